use crate::exit_codes::ExitCode;

#[derive(Debug)]
pub enum RunError {
    InvalidInput(anyhow::Error),
    RuntimeError(anyhow::Error),
}

impl RunError {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidInput(_) => ExitCode::InvalidInput,
            Self::RuntimeError(_) => ExitCode::RuntimeError,
        }
    }

    #[must_use]
    pub fn anyhow(&self) -> &anyhow::Error {
        match self {
            Self::InvalidInput(e) | Self::RuntimeError(e) => e,
        }
    }

    /// Sorts an engine error by whether the plan or the run is at fault.
    pub fn from_core(err: paced_core::Error) -> Self {
        use paced_core::Error as E;
        match err {
            E::Join(_) | E::Metrics(_) | E::Listener(_) => Self::RuntimeError(err.into()),
            E::EmptyPlan
            | E::Schedule { .. }
            | E::InvalidThreads(_)
            | E::InvalidLoops(_)
            | E::InvalidDuration(_)
            | E::Unbounded(_)
            | E::InvalidThroughput(_)
            | E::InvalidCounter(_)
            | E::ConfigNotCloneable { .. }
            | E::MisplacedElement { .. }
            | E::InvalidReportInterval => Self::InvalidInput(err.into()),
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(e) | Self::RuntimeError(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.anyhow().as_ref())
    }
}
