use super::*;

#[test]
fn test_transport_is_retryable() {
    assert!(SocketonError::Transport("timed out".into()).is_retryable());
}

#[test]
fn test_internal_is_retryable() {
    let e = SocketonError::Internal(anyhow::anyhow!("socket closed"));
    assert!(e.is_retryable());
}

#[test]
fn test_config_not_retryable() {
    assert!(!SocketonError::Config("sessionDir is required".into()).is_retryable());
}

#[test]
fn test_shape_errors_not_retryable() {
    assert!(!SocketonError::MalformedResponse("not json".into()).is_retryable());
    assert!(!SocketonError::PathNotFound("xwa2_newsletter".into()).is_retryable());
}

#[test]
fn test_logged_out_not_retryable() {
    assert!(!SocketonError::LoggedOut.is_retryable());
}

#[test]
fn test_display_includes_detail() {
    let e = SocketonError::PathNotFound("xwa2_newsletter_create".into());
    assert_eq!(e.to_string(), "result path not found: xwa2_newsletter_create");
}

#[test]
fn test_anyhow_conversion() {
    fn inner() -> anyhow::Result<()> {
        anyhow::bail!("boom")
    }
    fn outer() -> Result<(), SocketonError> {
        inner()?;
        Ok(())
    }
    assert!(matches!(outer(), Err(SocketonError::Internal(_))));
}
