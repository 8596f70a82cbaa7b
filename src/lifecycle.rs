// 该文件是 Shihuang （拾荒） 项目的一部分。
// src/lifecycle.rs - 模型生命周期状态机
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{error, info, warn};

/// 模型生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
  /// 尚未加载
  Unloaded,
  /// 正在加载
  Loading,
  /// 就绪，可执行推理
  Ready,
  /// 加载失败
  Error,
}

impl fmt::Display for ModelState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let text = match self {
      ModelState::Unloaded => "未加载",
      ModelState::Loading => "加载中",
      ModelState::Ready => "就绪",
      ModelState::Error => "错误",
    };
    f.write_str(text)
  }
}

type StateCallback = Arc<dyn Fn(ModelState) + Send + Sync>;

#[derive(Default)]
struct Registry {
  next_id: u64,
  subscribers: BTreeMap<u64, StateCallback>,
}

struct StateInner<M> {
  state: ModelState,
  model: Option<Arc<M>>,
  last_error: Option<String>,
}

/// 模型生命周期管理
///
/// 状态转换: 未加载 → 加载中 → 就绪 | 错误。就绪与错误状态都可以
/// 重新发起加载；已处于加载中时再次调用 load 不会生效。每次状态
/// 转换都会按订阅顺序同步通知所有订阅者。
pub struct Lifecycle<M> {
  state: Arc<Mutex<StateInner<M>>>,
  registry: Arc<Mutex<Registry>>,
}

impl<M> Clone for Lifecycle<M> {
  fn clone(&self) -> Self {
    Self {
      state: Arc::clone(&self.state),
      registry: Arc::clone(&self.registry),
    }
  }
}

impl<M> Default for Lifecycle<M> {
  fn default() -> Self {
    Self::new()
  }
}

impl<M> Lifecycle<M> {
  pub fn new() -> Self {
    Self {
      state: Arc::new(Mutex::new(StateInner {
        state: ModelState::Unloaded,
        model: None,
        last_error: None,
      })),
      registry: Arc::new(Mutex::new(Registry::default())),
    }
  }

  fn lock_state(&self) -> MutexGuard<'_, StateInner<M>> {
    match self.state.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  /// 当前状态
  pub fn state(&self) -> ModelState {
    self.lock_state().state
  }

  /// 推理能力，仅在就绪状态下可用
  pub fn model(&self) -> Option<Arc<M>> {
    let inner = self.lock_state();
    if inner.state == ModelState::Ready {
      inner.model.clone()
    } else {
      None
    }
  }

  /// 最近一次加载失败的原因
  pub fn last_error(&self) -> Option<String> {
    self.lock_state().last_error.clone()
  }

  /// 订阅状态变更
  ///
  /// 新订阅者会立刻收到当前状态作为第一次通知。
  pub fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(ModelState) + Send + Sync + 'static,
  {
    let callback: StateCallback = Arc::new(callback);
    let id = {
      let mut registry = lock_registry(&self.registry);
      let id = registry.next_id;
      registry.next_id += 1;
      registry.subscribers.insert(id, Arc::clone(&callback));
      id
    };

    callback(self.state());

    Subscription {
      id,
      registry: Arc::downgrade(&self.registry),
    }
  }

  /// 发起一次加载
  ///
  /// loader 在当前线程同步执行，完成与否通过订阅通道观察；返回
  /// 加载结束时的状态。已处于加载中时直接返回，不触发任何转换。
  pub fn load<F, E>(&self, loader: F) -> ModelState
  where
    F: FnOnce() -> Result<M, E>,
    E: fmt::Display,
  {
    {
      let mut inner = self.lock_state();
      if inner.state == ModelState::Loading {
        warn!("模型正在加载中，忽略重复的加载请求");
        return ModelState::Loading;
      }
      inner.state = ModelState::Loading;
    }
    self.broadcast(ModelState::Loading);

    match loader() {
      Ok(model) => {
        {
          let mut inner = self.lock_state();
          inner.model = Some(Arc::new(model));
          inner.last_error = None;
          inner.state = ModelState::Ready;
        }
        info!("模型加载完成");
        self.broadcast(ModelState::Ready);
        ModelState::Ready
      }
      Err(e) => {
        {
          let mut inner = self.lock_state();
          inner.model = None;
          inner.last_error = Some(e.to_string());
          inner.state = ModelState::Error;
        }
        error!("模型加载失败: {}", e);
        self.broadcast(ModelState::Error);
        ModelState::Error
      }
    }
  }

  fn broadcast(&self, state: ModelState) {
    let snapshot: Vec<u64> = {
      let registry = lock_registry(&self.registry);
      registry.subscribers.keys().copied().collect()
    };

    for id in snapshot {
      // 调用前再次确认订阅仍然有效，广播期间的退订立即生效
      let callback = {
        let registry = lock_registry(&self.registry);
        registry.subscribers.get(&id).cloned()
      };
      if let Some(callback) = callback {
        callback(state);
      }
    }
  }
}

fn lock_registry(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
  match registry.lock() {
    Ok(guard) => guard,
    Err(poisoned) => poisoned.into_inner(),
  }
}

/// 订阅句柄
pub struct Subscription {
  id: u64,
  registry: Weak<Mutex<Registry>>,
}

impl Subscription {
  /// 取消订阅，可重复调用
  pub fn unsubscribe(&self) {
    if let Some(registry) = self.registry.upgrade() {
      lock_registry(&registry).subscribers.remove(&self.id);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::convert::Infallible;

  fn recorded() -> (Arc<Mutex<Vec<ModelState>>>, impl Fn(ModelState) + Send + Sync) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    (events, move |state| sink.lock().unwrap().push(state))
  }

  #[test]
  fn subscriber_receives_current_state_immediately() {
    let lifecycle: Lifecycle<u32> = Lifecycle::new();
    let (events, callback) = recorded();

    let _sub = lifecycle.subscribe(callback);

    assert_eq!(*events.lock().unwrap(), vec![ModelState::Unloaded]);
  }

  #[test]
  fn successful_load_notifies_in_order() {
    let lifecycle: Lifecycle<u32> = Lifecycle::new();
    let (events, callback) = recorded();
    let _sub = lifecycle.subscribe(callback);

    let state = lifecycle.load(|| Ok::<_, Infallible>(7));

    assert_eq!(state, ModelState::Ready);
    assert_eq!(
      *events.lock().unwrap(),
      vec![ModelState::Unloaded, ModelState::Loading, ModelState::Ready]
    );
    assert_eq!(lifecycle.model().map(|m| *m), Some(7));
    assert!(lifecycle.last_error().is_none());
  }

  #[test]
  fn failed_load_records_cause_and_allows_retry() {
    let lifecycle: Lifecycle<u32> = Lifecycle::new();
    let (events, callback) = recorded();
    let _sub = lifecycle.subscribe(callback);

    let state = lifecycle.load(|| Err::<u32, _>("模型文件损坏"));

    assert_eq!(state, ModelState::Error);
    assert!(lifecycle.model().is_none());
    assert_eq!(lifecycle.last_error().as_deref(), Some("模型文件损坏"));

    let state = lifecycle.load(|| Ok::<_, Infallible>(9));

    assert_eq!(state, ModelState::Ready);
    assert_eq!(
      *events.lock().unwrap(),
      vec![
        ModelState::Unloaded,
        ModelState::Loading,
        ModelState::Error,
        ModelState::Loading,
        ModelState::Ready
      ]
    );
  }

  #[test]
  fn load_while_loading_is_a_no_op() {
    let lifecycle: Lifecycle<u32> = Lifecycle::new();
    let (events, callback) = recorded();
    let _sub = lifecycle.subscribe(callback);

    let inner = lifecycle.clone();
    let state = lifecycle.load(move || {
      // 此时外层加载尚未结束，重复请求必须被忽略
      assert_eq!(inner.load(|| Ok::<_, Infallible>(1)), ModelState::Loading);
      Ok::<_, Infallible>(2)
    });

    assert_eq!(state, ModelState::Ready);
    assert_eq!(lifecycle.model().map(|m| *m), Some(2));
    assert_eq!(
      *events.lock().unwrap(),
      vec![ModelState::Unloaded, ModelState::Loading, ModelState::Ready]
    );
  }

  #[test]
  fn unsubscribe_is_idempotent() {
    let lifecycle: Lifecycle<u32> = Lifecycle::new();
    let (events, callback) = recorded();
    let sub = lifecycle.subscribe(callback);

    sub.unsubscribe();
    sub.unsubscribe();
    let _ = lifecycle.load(|| Ok::<_, Infallible>(1));

    assert_eq!(*events.lock().unwrap(), vec![ModelState::Unloaded]);
  }

  #[test]
  fn unsubscribe_during_broadcast_stops_notifications() {
    let lifecycle: Lifecycle<u32> = Lifecycle::new();
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    let victim_events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&victim_events);

    let slot_in_callback = Arc::clone(&slot);
    let _first = lifecycle.subscribe(move |_state| {
      if let Some(sub) = slot_in_callback.lock().unwrap().as_ref() {
        sub.unsubscribe();
      }
    });
    let victim = lifecycle.subscribe(move |state| sink.lock().unwrap().push(state));
    *slot.lock().unwrap() = Some(victim);

    let _ = lifecycle.load(|| Ok::<_, Infallible>(1));

    // 第一个订阅者在每次广播里先退订了第二个，因此第二个只收到过
    // 订阅时的即时通知
    assert_eq!(*victim_events.lock().unwrap(), vec![ModelState::Unloaded]);
  }
}
