//! 同步状态与调度相位
//!
//! `SyncPhase` 转换表：
//!
//! | 当前 \ 事件          | 写入                  | 定时器触发（当前代）   | 手动同步          | 推送结束                 | 切到离线        |
//! |----------------------|-----------------------|------------------------|-------------------|--------------------------|-----------------|
//! | Idle                 | Scheduled             | -                      | InFlight          | -                        | Idle            |
//! | Scheduled            | Scheduled（替换定时器）| InFlight               | InFlight（取消定时器）| -                    | Idle            |
//! | InFlight{r}          | InFlight{新定时器}    | 拒绝，InFlight{None}   | 拒绝              | r 为空 → Idle，否则 Scheduled(r) | InFlight{None} |
//!
//! 过期代数的定时器一律忽略。

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::task::AbortHandle;

/// 每个适配器一份的同步状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// 最近一次成功推送的时间（UTC 毫秒）
    pub last_sync_timestamp: Option<i64>,
    /// 是否有推送正在进行（同一适配器最多一个）
    pub is_syncing: bool,
    /// 远端是否已有副本
    pub has_remote_copy: bool,
    /// 最近的推送错误，超出容量丢弃最旧的
    pub pending_errors: VecDeque<String>,
}

impl SyncState {
    pub(crate) fn record_error(&mut self, message: String, capacity: usize) {
        self.pending_errors.push_back(message);
        while self.pending_errors.len() > capacity {
            self.pending_errors.pop_front();
        }
    }

    pub(crate) fn record_success(&mut self, timestamp: i64) {
        self.last_sync_timestamp = Some(timestamp);
        self.has_remote_copy = true;
    }
}

/// 已安排的防抖定时器
#[derive(Debug)]
pub(crate) struct TimerSlot {
    pub(crate) generation: u64,
    pub(crate) handle: AbortHandle,
}

impl TimerSlot {
    fn cancel(self) {
        self.handle.abort();
    }
}

/// 定时器触发时的判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerDecision {
    /// 开始推送（已进入 InFlight）
    Start,
    /// 已有推送在进行，本次放弃
    Refused,
    /// 已被更新的写入替换
    Stale,
}

/// 调度相位
#[derive(Debug, Default)]
pub(crate) enum SyncPhase {
    #[default]
    Idle,
    Scheduled(TimerSlot),
    InFlight { rescheduled: Option<TimerSlot> },
}

impl SyncPhase {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Scheduled(_) => "scheduled",
            SyncPhase::InFlight { .. } => "in_flight",
        }
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        matches!(self, SyncPhase::InFlight { .. })
    }

    /// 是否有尚未触发的定时器
    pub(crate) fn has_timer(&self) -> bool {
        matches!(
            self,
            SyncPhase::Scheduled(_) | SyncPhase::InFlight { rescheduled: Some(_) }
        )
    }

    /// 写入：用新定时器替换旧定时器
    pub(crate) fn on_write(&mut self, slot: TimerSlot) {
        *self = match std::mem::take(self) {
            SyncPhase::Idle => SyncPhase::Scheduled(slot),
            SyncPhase::Scheduled(old) => {
                old.cancel();
                SyncPhase::Scheduled(slot)
            }
            SyncPhase::InFlight { rescheduled } => {
                if let Some(old) = rescheduled {
                    old.cancel();
                }
                SyncPhase::InFlight {
                    rescheduled: Some(slot),
                }
            }
        };
    }

    /// 定时器触发
    pub(crate) fn on_timer(&mut self, generation: u64) -> TimerDecision {
        match self {
            SyncPhase::Scheduled(slot) if slot.generation == generation => {
                *self = SyncPhase::InFlight { rescheduled: None };
                TimerDecision::Start
            }
            SyncPhase::InFlight { rescheduled } => {
                if rescheduled
                    .as_ref()
                    .is_some_and(|slot| slot.generation == generation)
                {
                    *rescheduled = None;
                    TimerDecision::Refused
                } else {
                    TimerDecision::Stale
                }
            }
            _ => TimerDecision::Stale,
        }
    }

    /// 手动同步：绕过防抖，仍遵守单飞
    pub(crate) fn try_start_manual(&mut self) -> bool {
        match std::mem::take(self) {
            SyncPhase::InFlight { rescheduled } => {
                *self = SyncPhase::InFlight { rescheduled };
                false
            }
            SyncPhase::Scheduled(slot) => {
                slot.cancel();
                *self = SyncPhase::InFlight { rescheduled: None };
                true
            }
            SyncPhase::Idle => {
                *self = SyncPhase::InFlight { rescheduled: None };
                true
            }
        }
    }

    /// 推送结束（成功或失败）
    pub(crate) fn on_complete(&mut self) {
        *self = match std::mem::take(self) {
            SyncPhase::InFlight {
                rescheduled: Some(slot),
            } => SyncPhase::Scheduled(slot),
            SyncPhase::InFlight { rescheduled: None } => SyncPhase::Idle,
            other => other,
        };
    }

    /// 取消所有未触发的定时器（切到离线、重置）
    pub(crate) fn cancel_timers(&mut self) {
        *self = match std::mem::take(self) {
            SyncPhase::Scheduled(slot) => {
                slot.cancel();
                SyncPhase::Idle
            }
            SyncPhase::InFlight { rescheduled } => {
                if let Some(slot) = rescheduled {
                    slot.cancel();
                }
                SyncPhase::InFlight { rescheduled: None }
            }
            SyncPhase::Idle => SyncPhase::Idle,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(generation: u64) -> (TimerSlot, tokio::task::JoinHandle<()>) {
        let handle = tokio::spawn(std::future::pending::<()>());
        (
            TimerSlot {
                generation,
                handle: handle.abort_handle(),
            },
            handle,
        )
    }

    #[test]
    fn pending_errors_are_bounded() {
        let mut state = SyncState::default();
        for i in 0..5 {
            state.record_error(format!("e{}", i), 3);
        }
        assert_eq!(state.pending_errors, VecDeque::from(vec!["e2".to_string(), "e3".into(), "e4".into()]));
    }

    #[tokio::test]
    async fn write_replaces_scheduled_timer() {
        let mut phase = SyncPhase::Idle;
        let (s1, h1) = slot(1);
        let (s2, _h2) = slot(2);

        phase.on_write(s1);
        phase.on_write(s2);
        assert_eq!(phase.label(), "scheduled");
        assert!(h1.await.unwrap_err().is_cancelled());

        // 旧代数触发被忽略
        assert_eq!(phase.on_timer(1), TimerDecision::Stale);
        assert_eq!(phase.on_timer(2), TimerDecision::Start);
        assert!(phase.is_in_flight());
    }

    #[tokio::test]
    async fn write_during_flight_reschedules_for_next_window() {
        let mut phase = SyncPhase::Idle;
        assert!(phase.try_start_manual());
        assert!(!phase.try_start_manual());

        let (s, _h) = slot(7);
        phase.on_write(s);
        assert!(phase.is_in_flight());
        assert!(phase.has_timer());

        phase.on_complete();
        assert_eq!(phase.label(), "scheduled");
        assert_eq!(phase.on_timer(7), TimerDecision::Start);
    }

    #[tokio::test]
    async fn timer_firing_during_flight_is_refused() {
        let mut phase = SyncPhase::Idle;
        assert!(phase.try_start_manual());
        let (s, _h) = slot(3);
        phase.on_write(s);

        assert_eq!(phase.on_timer(3), TimerDecision::Refused);
        assert!(!phase.has_timer());
        phase.on_complete();
        assert_eq!(phase.label(), "idle");
    }

    #[tokio::test]
    async fn manual_cancels_pending_timer() {
        let mut phase = SyncPhase::Idle;
        let (s, h) = slot(1);
        phase.on_write(s);
        assert!(phase.try_start_manual());
        assert!(h.await.unwrap_err().is_cancelled());
        assert_eq!(phase.on_timer(1), TimerDecision::Stale);
    }

    #[tokio::test]
    async fn cancel_timers_keeps_flight_running() {
        let mut phase = SyncPhase::Idle;
        let (s, h) = slot(1);
        phase.on_write(s);
        phase.cancel_timers();
        assert_eq!(phase.label(), "idle");
        assert!(h.await.unwrap_err().is_cancelled());

        assert!(phase.try_start_manual());
        let (s, _h) = slot(2);
        phase.on_write(s);
        phase.cancel_timers();
        assert!(phase.is_in_flight());
        assert!(!phase.has_timer());
    }
}
