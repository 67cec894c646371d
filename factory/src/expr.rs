//! Rewrites `__MATH__(operand, propId, op)` expressions inside
//! allocation property requests against a component's live configure
//! properties.

use sideband_assembly::{MathOp, Property, PropertyValue, SimpleValue};
use tracing::trace;

use crate::{error::Error, reserved::MATH_MARKER};

/// Rewrites every `__MATH__` string value in `request`, recursing into
/// struct-valued properties. The referenced property is searched first
/// at the top level of `configure`, then inside any struct-valued
/// member; the result keeps the referenced property's type code.
pub fn evaluate_math_requests(
    request: &mut [Property],
    configure: &[Property],
) -> Result<(), Error> {
    for property in request {
        match &mut property.value {
            PropertyValue::Struct(members) => {
                evaluate_math_requests(members, configure)?;
            }
            PropertyValue::Simple(SimpleValue::Str(text)) if text.contains(MATH_MARKER) => {
                let rewritten = evaluate(text, configure)?;
                trace!(property = %property.id, value = %rewritten, "rewrote allocation expression");
                property.value = PropertyValue::Simple(rewritten);
            }
            _ => {}
        }
    }
    Ok(())
}

fn evaluate(text: &str, configure: &[Property]) -> Result<SimpleValue, Error> {
    let malformed = |message: &str| Error::MalformedMathExpression {
        expression: text.to_string(),
        message: message.to_string(),
    };

    let statement = &text[text.find(MATH_MARKER).unwrap_or(0) + MATH_MARKER.len()..];
    let inner = statement
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| malformed("expected a parenthesized argument list"))?;

    let args: Vec<&str> = inner.split(',').map(str::trim).collect();
    let &[operand, property_id, op] = args.as_slice() else {
        return Err(malformed("expected exactly three arguments"));
    };

    let operand: f64 = operand
        .parse()
        .map_err(|_| malformed("first argument must be a numeric literal"))?;
    let op = MathOp::parse(op).ok_or_else(|| malformed("unknown operator"))?;

    let value = lookup(configure, property_id).ok_or_else(|| Error::UnknownMathProperty {
        property: property_id.to_string(),
    })?;

    value
        .apply_math(operand, op)
        .ok_or_else(|| malformed("referenced property is not numeric"))
}

/// Finds the referenced configure property: top level first, then one
/// level inside struct-valued properties.
fn lookup<'a>(configure: &'a [Property], id: &str) -> Option<&'a SimpleValue> {
    if let Some(property) = configure.iter().find(|property| property.id == id) {
        return property.value.as_simple();
    }
    configure
        .iter()
        .filter_map(|property| property.value.as_struct())
        .flat_map(|members| members.iter())
        .find(|member| member.id == id)
        .and_then(|member| member.value.as_simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn math_request(expression: &str) -> Vec<Property> {
        vec![Property::simple(
            "memCapacity",
            SimpleValue::Str(expression.to_string()),
        )]
    }

    #[test]
    fn rewrites_against_a_long_property_and_keeps_the_type() {
        let configure = vec![Property::simple("frames", SimpleValue::Long(5))];
        let mut request = math_request("__MATH__(2.0, frames, *)");
        evaluate_math_requests(&mut request, &configure).unwrap();
        assert_eq!(
            request[0].value,
            PropertyValue::Simple(SimpleValue::Long(10))
        );
    }

    #[test]
    fn finds_properties_inside_structs() {
        let configure = vec![Property::new(
            "tuner_status",
            PropertyValue::Struct(vec![Property::simple(
                "sample_rate",
                SimpleValue::Double(1000.0),
            )]),
        )];
        let mut request = math_request("__MATH__(4, sample_rate, /)");
        evaluate_math_requests(&mut request, &configure).unwrap();
        assert_eq!(
            request[0].value,
            PropertyValue::Simple(SimpleValue::Double(250.0))
        );
    }

    #[test]
    fn recurses_into_struct_valued_requests() {
        let configure = vec![Property::simple("frames", SimpleValue::Long(3))];
        let mut request = vec![Property::new(
            "capacity_struct",
            PropertyValue::Struct(vec![Property::simple(
                "depth",
                SimpleValue::Str("__MATH__(2, frames, +)".to_string()),
            )]),
        )];
        evaluate_math_requests(&mut request, &configure).unwrap();
        let PropertyValue::Struct(members) = &request[0].value else {
            panic!("struct value expected");
        };
        assert_eq!(members[0].value, PropertyValue::Simple(SimpleValue::Long(5)));
    }

    #[test]
    fn unknown_property_is_an_error() {
        let mut request = math_request("__MATH__(2.0, missing, *)");
        let err = evaluate_math_requests(&mut request, &[]).unwrap_err();
        let Error::UnknownMathProperty { property } = err else {
            panic!("expected UnknownMathProperty, got {err:?}");
        };
        assert_eq!(property, "missing");
    }

    #[test]
    fn missing_parentheses_are_an_error() {
        let configure = vec![Property::simple("frames", SimpleValue::Long(5))];
        let mut request = math_request("__MATH__ 2.0, frames, *");
        let err = evaluate_math_requests(&mut request, &configure).unwrap_err();
        assert!(matches!(err, Error::MalformedMathExpression { .. }));
    }

    #[test]
    fn wrong_argument_count_is_an_error() {
        let configure = vec![Property::simple("frames", SimpleValue::Long(5))];
        let mut request = math_request("__MATH__(2.0, frames)");
        let err = evaluate_math_requests(&mut request, &configure).unwrap_err();
        assert!(matches!(err, Error::MalformedMathExpression { .. }));
    }

    #[test]
    fn non_math_values_pass_through_untouched() {
        let mut request = vec![Property::simple("plain", SimpleValue::Str("x86_64".into()))];
        let original = request.clone();
        evaluate_math_requests(&mut request, &[]).unwrap();
        assert_eq!(request, original);
    }
}
