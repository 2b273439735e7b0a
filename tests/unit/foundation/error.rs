use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        PixelflowError::validation("x")
            .to_string()
            .contains("validation error:")
    );
    assert!(
        PixelflowError::precondition("x")
            .to_string()
            .contains("precondition error:")
    );
    assert!(
        PixelflowError::decode("x")
            .to_string()
            .contains("decode error:")
    );
    assert!(
        PixelflowError::evaluation("x")
            .to_string()
            .contains("evaluation error:")
    );
}

#[test]
fn timeout_is_distinct_from_execution_failure() {
    let t = PixelflowError::Timeout {
        elapsed: Duration::from_millis(5),
    };
    assert!(t.is_timeout());
    assert!(!PixelflowError::evaluation("boom").is_timeout());
    assert!(!PixelflowError::Cancelled.is_timeout());
}

#[test]
fn other_preserves_source_and_clones() {
    let base = std::io::Error::other("boom");
    let err = PixelflowError::from(anyhow::Error::new(base));
    let copy = err.clone();
    assert!(err.to_string().contains("boom"));
    assert_eq!(err.to_string(), copy.to_string());
}
