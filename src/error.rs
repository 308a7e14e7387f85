pub type HatchResult<T> = Result<T, HatchError>;

#[derive(thiserror::Error, Debug)]
pub enum HatchError {
    #[error("invalid block data in '{block}': {reason}")]
    InvalidBlockData { block: String, reason: String },

    #[error("invalid variable name '{0}'")]
    UnknownVariable(String),

    #[error("cycle in script chain at block '{0}'")]
    ScriptCycle(String),

    #[error("block '{0}' referenced but not defined")]
    MissingBlock(String),

    #[error("asset error: {0}")]
    Asset(String),

    #[error("project error: {0}")]
    Project(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    /// Raised by `control_stop` with "this script"; the execution unit ends normally.
    #[error("script stopped")]
    ScriptStopped,

    /// Raised at a suspension point after a scoped "stop all".
    #[error("execution halted")]
    Halted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

impl HatchError {
    pub fn invalid_block(block: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidBlockData {
            block: block.into(),
            reason: reason.into(),
        }
    }

    pub fn asset(msg: impl Into<String>) -> Self {
        Self::Asset(msg.into())
    }

    pub fn project(msg: impl Into<String>) -> Self {
        Self::Project(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// True for the two control signals that end an execution unit without a fault.
    pub fn is_termination(&self) -> bool {
        matches!(self, Self::ScriptStopped | Self::Halted)
    }
}
