//! Assertion macros for device-interface errors.

/// Assert that a `Result` failed with the given numeric error code.
///
/// ```rust
/// use devif_model::Error;
/// use devif_test_helpers::assert_error_code;
///
/// let result: Result<(), Error> = Err(Error::parse("bad"));
/// assert_error_code!(result, -22);
/// ```
#[macro_export]
macro_rules! assert_error_code {
    ($result:expr, $code:expr $(,)?) => {
        match $result {
            Ok(v) => panic!(
                "assertion failed: expected error code {}, got Ok({:?})",
                $code, v
            ),
            Err(e) => {
                let e: $crate::__private::Error = e;
                if e.code() != $code {
                    panic!(
                        "assertion failed: expected error code {}\n   got: {} ({})",
                        $code,
                        e.code(),
                        e
                    );
                }
            }
        }
    };
}

/// Assert that an error carries a payload attribute with the given value.
///
/// ```rust
/// use devif_model::prelude::*;
/// use devif_test_helpers::assert_payload_field;
///
/// let err = Error::operation("mismatch")
///     .with_payload(Tree::generic("error").with_attr("reg", 4u32));
/// assert_payload_field!(err, "reg", 4);
/// ```
#[macro_export]
macro_rules! assert_payload_field {
    ($error:expr, $field:expr, $value:expr $(,)?) => {
        let error: &$crate::__private::Error = &$error;
        let expected: $crate::__private::Value = ($value).into();
        let actual = $crate::assertions::payload_field(error, $field);
        if actual.as_ref() != Some(&expected) {
            panic!(
                "assertion failed: payload field `{}`\n  expected: {:?}\n       got: {:?}\n     error: {}",
                $field, expected, actual, error
            );
        }
    };
}

/// Payload attribute of an error, if the payload is a node carrying it.
pub fn payload_field(
    error: &devif_model::Error,
    field: &str,
) -> Option<devif_model::Value> {
    let tree = error.payload()?.as_node().ok()?;
    tree.get_attr(tree.root(), field).ok().cloned()
}
