//! Failure phases mapped to exit codes: init failures exit 1, fatal
//! runtime errors exit 2, clean shutdown exits 0.

#[derive(Debug)]
pub enum ServiceFailure {
    Init(anyhow::Error),
    Runtime(anyhow::Error),
}

impl ServiceFailure {
    pub fn init(err: impl Into<anyhow::Error>) -> Self {
        ServiceFailure::Init(err.into())
    }

    pub fn runtime(err: impl Into<anyhow::Error>) -> Self {
        ServiceFailure::Runtime(err.into())
    }
}
