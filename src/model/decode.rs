// 该文件是 Shihuang （拾荒） 项目的一部分。
// src/model/decode.rs - 得分解码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::cmp::Ordering;

use thiserror::Error;
use tracing::debug;

use crate::model::{ClassScore, ClassifyResult, OutputScores, WithLabel};

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("得分数量与类别数量不匹配: 得分 {scores}, 类别 {labels}")]
  LabelMismatch { scores: usize, labels: usize },
}

/// 将原始得分解码为分类结果
///
/// softmax 先减去最大得分再做指数运算，避免大 logit 溢出。
/// argmax 在得分相同时取编号最小的类别；降序排序是稳定的，
/// 置信度相同的类别保持类别表顺序。
pub fn decode<T: WithLabel>(scores: &OutputScores) -> Result<ClassifyResult<T>, DecodeError> {
  if scores.len() != T::COUNT {
    return Err(DecodeError::LabelMismatch {
      scores: scores.len(),
      labels: T::COUNT,
    });
  }

  let probs = softmax(scores.as_slice());

  let mut top_id = 0usize;
  for (id, &prob) in probs.iter().enumerate() {
    if prob > probs[top_id] {
      top_id = id;
    }
  }

  let mut ranked: Vec<ClassScore<T>> = probs
    .iter()
    .enumerate()
    .map(|(id, &score)| ClassScore {
      kind: T::from_label_id(id as u32),
      score,
    })
    .collect();
  ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

  debug!("解码完成: 类别编号 {}, 置信度 {:.4}", top_id, probs[top_id]);

  Ok(ClassifyResult {
    top: ClassScore {
      kind: T::from_label_id(top_id as u32),
      score: probs[top_id],
    },
    ranked: ranked.into_boxed_slice(),
  })
}

fn softmax(scores: &[f32]) -> Vec<f32> {
  let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps: Vec<f32> = scores.iter().map(|&score| (score - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  exps.into_iter().map(|exp| exp / sum).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::WasteLabel;

  fn scores(values: &[f32]) -> OutputScores {
    OutputScores::from(values.to_vec())
  }

  #[test]
  fn confidences_sum_to_one_and_argmax_wins() {
    let result = decode::<WasteLabel>(&scores(&[2.0, 1.0, 0.1, 0.0, 0.0, 0.0])).unwrap();

    let sum: f32 = result.ranked.iter().map(|item| item.score).sum();
    assert!((sum - 1.0).abs() < 1e-6);
    assert_eq!(result.top.kind, WasteLabel::Cardboard);
    assert_eq!(result.ranked[0].kind, WasteLabel::Cardboard);
    assert!(result.top.score > result.ranked[1].score);
  }

  #[test]
  fn large_logits_stay_finite() {
    let result = decode::<WasteLabel>(&scores(&[1000.0, 0.5, 0.1, 0.0, -3.0, 2.0])).unwrap();

    for item in result.ranked.iter() {
      assert!(item.score.is_finite());
    }
    assert_eq!(result.top.kind, WasteLabel::Cardboard);
    assert!((result.top.score - 1.0).abs() < 1e-6);
  }

  #[test]
  fn equal_scores_break_ties_by_first_class() {
    let first = decode::<WasteLabel>(&scores(&[0.5; 6])).unwrap();
    let second = decode::<WasteLabel>(&scores(&[0.5; 6])).unwrap();

    assert_eq!(first.top.kind, WasteLabel::Cardboard);
    for (id, item) in first.ranked.iter().enumerate() {
      assert_eq!(item.kind, WasteLabel::from_label_id(id as u32));
      assert_eq!(item.kind, second.ranked[id].kind);
      assert!((item.score - 1.0 / 6.0).abs() < 1e-6);
    }
  }

  #[test]
  fn ranked_list_is_sorted_descending() {
    let result = decode::<WasteLabel>(&scores(&[0.3, 2.5, -1.0, 0.9, 0.9, 0.0])).unwrap();

    for window in result.ranked.windows(2) {
      assert!(window[0].score >= window[1].score);
    }
    assert_eq!(result.top.kind, WasteLabel::Glass);
  }

  #[test]
  fn score_count_must_match_label_count() {
    let err = decode::<WasteLabel>(&scores(&[1.0, 2.0, 3.0])).unwrap_err();
    assert!(matches!(
      err,
      DecodeError::LabelMismatch {
        scores: 3,
        labels: 6
      }
    ));
  }
}
