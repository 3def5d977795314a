//! Feedback Manager

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::time::Instant;
use tracing::debug;

use crate::config::{FeedbackConfig, ResilienceConfig};
use crate::execution::{ExecutionStatus, ToolExecutionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Recommendation derived from one result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FollowUpAction {
    ReportStatus { message: String, level: StatusLevel },
    RetrySuggested { execution_id: String },
    EscalateToUser { reason: String },
}

#[derive(Debug)]
pub struct FeedbackManager {
    config: FeedbackConfig,
    max_retries: u32,
    debug: bool,
    /// Recent timeout instants per tool, oldest first
    timeouts: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl FeedbackManager {
    pub fn new(config: &ResilienceConfig) -> Self {
        Self {
            config: config.feedback.clone(),
            max_retries: config.retry.max_retries,
            debug: config.handler.debug,
            timeouts: Mutex::new(HashMap::new()),
        }
    }

    /// Classify one result. Actions come back in the order they should be
    /// handled.
    pub fn process_result(&self, result: &ToolExecutionResult) -> Vec<FollowUpAction> {
        let actions = match result.status {
            ExecutionStatus::Success => self.on_success(result),
            ExecutionStatus::Failed => self.on_failure(result),
            ExecutionStatus::TimedOut => self.on_timeout(result),
        };
        debug!(
            execution_id = %result.execution_id,
            status = %result.status,
            actions = actions.len(),
            "Processed tool result"
        );
        actions
    }

    /// Classify a whole batch, keeping result order
    pub fn process_results(&self, results: &[ToolExecutionResult]) -> Vec<Vec<FollowUpAction>> {
        results.iter().map(|r| self.process_result(r)).collect()
    }

    fn on_success(&self, result: &ToolExecutionResult) -> Vec<FollowUpAction> {
        if result.retry_count > 0 {
            return vec![FollowUpAction::ReportStatus {
                message: format!(
                    "{} succeeded after {} retries",
                    result.tool_name, result.retry_count
                ),
                level: StatusLevel::Info,
            }];
        }
        if self.debug {
            return vec![FollowUpAction::ReportStatus {
                message: format!(
                    "{} succeeded in {}ms",
                    result.tool_name,
                    result.duration.as_millis()
                ),
                level: StatusLevel::Debug,
            }];
        }
        Vec::new()
    }

    fn on_failure(&self, result: &ToolExecutionResult) -> Vec<FollowUpAction> {
        let Some(error) = &result.error else {
            return vec![FollowUpAction::EscalateToUser {
                reason: format!("{} failed without an error report", result.tool_name),
            }];
        };

        if !error.is_retryable() {
            return vec![FollowUpAction::EscalateToUser {
                reason: format!("{} failed: {}", result.tool_name, error),
            }];
        }
        if result.retry_count < self.max_retries {
            return vec![FollowUpAction::RetrySuggested {
                execution_id: result.execution_id.clone(),
            }];
        }
        vec![FollowUpAction::EscalateToUser {
            reason: format!(
                "{} still failing after {} retries: {}",
                result.tool_name, result.retry_count, error
            ),
        }]
    }

    fn on_timeout(&self, result: &ToolExecutionResult) -> Vec<FollowUpAction> {
        let mut actions = vec![FollowUpAction::ReportStatus {
            message: format!(
                "{} timed out after {}ms",
                result.tool_name,
                result.duration.as_millis()
            ),
            level: StatusLevel::Warning,
        }];

        let recent = self.record_timeout(&result.tool_name);
        if recent > self.config.timeout_escalation_count {
            actions.push(FollowUpAction::EscalateToUser {
                reason: format!(
                    "{} timed out {} times in the last {}s",
                    result.tool_name,
                    recent,
                    self.config.timeout_window.as_secs()
                ),
            });
        }
        actions
    }

    /// Record a timeout and return how many fall inside the window
    fn record_timeout(&self, tool_name: &str) -> usize {
        let now = Instant::now();
        let mut timeouts = self.timeouts.lock();
        self.prune(&mut timeouts, now);
        let recent = timeouts.entry(tool_name.to_string()).or_default();
        recent.push_back(now);
        recent.len()
    }

    /// Timeouts of `tool_name` currently inside the window
    pub fn recent_timeouts(&self, tool_name: &str) -> usize {
        let mut timeouts = self.timeouts.lock();
        self.prune(&mut timeouts, Instant::now());
        timeouts.get(tool_name).map_or(0, VecDeque::len)
    }

    /// Drop instants older than the window, and tools left with none
    fn prune(&self, timeouts: &mut HashMap<String, VecDeque<Instant>>, now: Instant) {
        let window = self.config.timeout_window;
        timeouts.retain(|_, recent| {
            while recent
                .front()
                .is_some_and(|at| now.saturating_duration_since(*at) > window)
            {
                recent.pop_front();
            }
            !recent.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::AgentError;
    use std::time::Duration;

    fn result(
        status: ExecutionStatus,
        error: Option<AgentError>,
        retry_count: u32,
    ) -> ToolExecutionResult {
        ToolExecutionResult {
            execution_id: "exec-1".to_string(),
            parent_execution_id: None,
            tool_name: "bash".to_string(),
            status,
            output: None,
            error,
            duration: Duration::from_millis(1200),
            retry_count,
        }
    }

    fn manager() -> FeedbackManager {
        FeedbackManager::new(&ResilienceConfig::default())
    }

    #[test]
    fn test_plain_success_is_silent() {
        assert!(manager()
            .process_result(&result(ExecutionStatus::Success, None, 0))
            .is_empty());
    }

    #[test]
    fn test_debug_success_reports() {
        let mut config = ResilienceConfig::default();
        config.handler.debug = true;
        let actions = FeedbackManager::new(&config)
            .process_result(&result(ExecutionStatus::Success, None, 0));
        assert!(matches!(
            actions.as_slice(),
            [FollowUpAction::ReportStatus { level: StatusLevel::Debug, .. }]
        ));
    }

    #[test]
    fn test_retried_success_reports_info() {
        let actions = manager().process_result(&result(ExecutionStatus::Success, None, 2));
        assert_eq!(
            actions,
            vec![FollowUpAction::ReportStatus {
                message: "bash succeeded after 2 retries".to_string(),
                level: StatusLevel::Info,
            }]
        );
    }

    #[test]
    fn test_retryable_failure_with_retries_left() {
        let error = AgentError::tool("bash", "busy", true);
        let actions = manager().process_result(&result(ExecutionStatus::Failed, Some(error), 1));
        assert_eq!(
            actions,
            vec![FollowUpAction::RetrySuggested {
                execution_id: "exec-1".to_string()
            }]
        );
    }

    #[test]
    fn test_exhausted_retries_escalate() {
        let error = AgentError::api(503, "overloaded");
        let actions = manager().process_result(&result(ExecutionStatus::Failed, Some(error), 3));
        assert!(matches!(
            actions.as_slice(),
            [FollowUpAction::EscalateToUser { reason }] if reason.contains("after 3 retries")
        ));
    }

    #[test]
    fn test_non_retryable_escalates() {
        let error = AgentError::validation("command", "required");
        let actions = manager().process_result(&result(ExecutionStatus::Failed, Some(error), 0));
        assert!(matches!(
            actions.as_slice(),
            [FollowUpAction::EscalateToUser { .. }]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recurring_timeouts_escalate_within_window() {
        let mut config = ResilienceConfig::default();
        config.feedback.timeout_escalation_count = 2;
        config.feedback.timeout_window = Duration::from_secs(60);
        let manager = FeedbackManager::new(&config);
        let timed_out = result(
            ExecutionStatus::TimedOut,
            Some(AgentError::timeout(Duration::from_secs(1))),
            0,
        );

        for _ in 0..2 {
            let actions = manager.process_result(&timed_out);
            assert_eq!(actions.len(), 1);
            assert!(matches!(
                actions[0],
                FollowUpAction::ReportStatus { level: StatusLevel::Warning, .. }
            ));
        }
        let actions = manager.process_result(&timed_out);
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[1], FollowUpAction::EscalateToUser { .. }));

        // old timeouts age out of the window
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(manager.recent_timeouts("bash"), 0);
        assert_eq!(manager.process_result(&timed_out).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_tools_are_forgotten() {
        let mut config = ResilienceConfig::default();
        config.feedback.timeout_window = Duration::from_secs(60);
        let manager = FeedbackManager::new(&config);
        let mut timed_out = result(
            ExecutionStatus::TimedOut,
            Some(AgentError::timeout(Duration::from_secs(1))),
            0,
        );
        for name in ["grep", "glob", "web_fetch"] {
            timed_out.tool_name = name.to_string();
            manager.process_result(&timed_out);
        }
        assert_eq!(manager.timeouts.lock().len(), 3);

        tokio::time::advance(Duration::from_secs(61)).await;
        timed_out.tool_name = "bash".to_string();
        manager.process_result(&timed_out);
        assert_eq!(manager.timeouts.lock().len(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(manager.recent_timeouts("bash"), 0);
        assert!(manager.timeouts.lock().is_empty());
    }

    #[test]
    fn test_action_serialization() {
        let action = FollowUpAction::RetrySuggested {
            execution_id: "abc".to_string(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "retry_suggested");
        assert_eq!(json["execution_id"], "abc");
    }
}
