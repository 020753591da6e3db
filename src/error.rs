use crate::state::TimerState;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
	#[error("cannot {operation} timer '{label}' while {from}")]
	InvalidTransition {
		label: String,
		operation: &'static str,
		from: TimerState,
	},
	#[error("invalid argument: {0}")]
	InvalidArgument(String),
	#[error("unknown timer state '{0}'")]
	UnknownEnumMember(String),
	#[error("scheduler ticker is already running")]
	TickerAlreadyRunning,
	#[error("scheduler ticker is not running")]
	TickerNotRunning,
	#[error("wait channel closed: {0}")]
	WaitChannelClosed(#[from] tokio::sync::broadcast::error::RecvError),
}
