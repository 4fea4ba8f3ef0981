use std::fmt;

/// Convenience alias for a result with our error type.
pub type Result<T, E = PimexecError> = std::result::Result<T, E>;

/// Error type used throughout the engine.
///
/// Errors are not meant to be recovered from. A raised error aborts the run
/// with a message (and optionally the lower-level error that triggered it).
#[derive(Debug)]
pub struct PimexecError {
    /// Message for the error.
    msg: String,

    /// Source of the error, if error was produced by some lower-level error.
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl PimexecError {
    pub fn new(msg: impl Into<String>) -> Self {
        PimexecError {
            msg: msg.into(),
            source: None,
        }
    }

    pub fn with_source(
        msg: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        PimexecError {
            msg: msg.into(),
            source: Some(source),
        }
    }
}

impl fmt::Display for PimexecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PimexecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl From<std::io::Error> for PimexecError {
    fn from(value: std::io::Error) -> Self {
        PimexecError::with_source("IO error", Box::new(value))
    }
}

impl From<std::num::ParseIntError> for PimexecError {
    fn from(value: std::num::ParseIntError) -> Self {
        PimexecError::with_source("Failed to parse integer", Box::new(value))
    }
}

/// An extension trait for getting required values out of options.
pub trait OptionExt<T> {
    /// Return an error with a message containing `field` if the option is
    /// None.
    fn required(self, field: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, field: &'static str) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(PimexecError::new(format!("Missing required field: {field}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_source() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "underneath");
        let err = PimexecError::with_source("on top", Box::new(inner));
        assert_eq!("on top: underneath", err.to_string());
    }

    #[test]
    fn required_missing() {
        let opt: Option<usize> = None;
        let err = opt.required("row_count").unwrap_err();
        assert!(err.to_string().contains("row_count"));
    }
}
