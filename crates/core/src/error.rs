use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedError {
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("invalid trigger configuration: {0}")]
    InvalidTrigger(String),

    #[error("bot not resolvable: {0}")]
    BotNotResolvable(String),

    #[error("dispatch error: {0}")]
    Dispatch(String),
}
