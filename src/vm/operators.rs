use rand::Rng;

use crate::error::{HatchError, HatchResult};
use crate::value::Value;

/// Numeric coercion for block arguments. An empty value reads as zero;
/// anything else must parse in full.
pub fn number(value: &Value, what: &str) -> HatchResult<f64> {
    if matches!(value, Value::Text(s) if s.trim().is_empty()) {
        return Ok(0.0);
    }
    value
        .to_number()
        .ok_or_else(|| HatchError::runtime(format!("{what}: cannot use '{value}' as a number")))
}

/// Uniform pick in `[from, to]` (either order). Integral bounds give an integer.
pub fn random_between(rng: &mut impl Rng, from: &Value, to: &Value) -> HatchResult<Value> {
    let a = number(from, "pick random")?;
    let b = number(to, "pick random")?;
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    if !low.is_finite() || !high.is_finite() {
        return Err(HatchError::runtime("pick random: bounds must be finite"));
    }
    if from.is_integral() && to.is_integral() {
        return Ok(Value::Int(rng.gen_range(low as i64..=high as i64)));
    }
    let span = high - low;
    if !span.is_finite() {
        return Err(HatchError::runtime(format!(
            "pick random: range {low} to {high} is too wide"
        )));
    }
    Ok(Value::Number(low + rng.gen::<f64>() * span))
}

/// Floored modulo: the result takes the sign of the divisor.
pub fn modulo(a: f64, b: f64) -> f64 {
    a - b * (a / b).floor()
}

/// The `operator_mathop` functions. Trigonometry works in degrees.
pub fn math_op(op: &str, n: f64) -> HatchResult<f64> {
    let out = match op.trim().to_ascii_lowercase().as_str() {
        "abs" => n.abs(),
        "floor" => n.floor(),
        "ceiling" => n.ceil(),
        "sqrt" => n.sqrt(),
        "sin" => n.to_radians().sin(),
        "cos" => n.to_radians().cos(),
        "tan" => n.to_radians().tan(),
        "asin" => n.asin().to_degrees(),
        "acos" => n.acos().to_degrees(),
        "atan" => n.atan().to_degrees(),
        "ln" => n.ln(),
        "log" => n.log10(),
        "e ^" => n.exp(),
        "10 ^" => 10f64.powf(n),
        other => return Err(HatchError::runtime(format!("unknown math function '{other}'"))),
    };
    Ok(out)
}

/// 1-based character access.
pub fn letter_of(index: f64, text: &str) -> HatchResult<String> {
    let count = text.chars().count();
    if index.fract() != 0.0 || index < 1.0 || index > count as f64 {
        return Err(HatchError::runtime(format!(
            "letter {index} of '{text}' is out of range"
        )));
    }
    text.chars()
        .nth(index as usize - 1)
        .map(String::from)
        .ok_or_else(|| HatchError::runtime("letter index out of range"))
}

pub fn contains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn integral_bounds_pick_integers() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..50 {
            let v = random_between(&mut rng, &Value::Number(2.0), &Value::Number(2.0))
                .expect("random");
            assert_eq!(v, Value::Int(2));
        }
        for _ in 0..200 {
            match random_between(&mut rng, &Value::Int(5), &Value::Int(1)).expect("random") {
                Value::Int(i) => assert!((1..=5).contains(&i)),
                other => panic!("expected integer, got {other:?}"),
            }
        }
    }

    #[test]
    fn fractional_bounds_pick_floats_in_range() {
        let mut rng = SmallRng::seed_from_u64(11);
        for _ in 0..200 {
            let v = random_between(&mut rng, &Value::Number(1.0), &Value::Number(1.5))
                .expect("random");
            let n = v.to_number().expect("number");
            assert!((1.0..=1.5).contains(&n), "{n}");
        }
        assert!(random_between(&mut rng, &Value::text("x"), &Value::Int(1)).is_err());
    }

    #[test]
    fn overflowing_span_is_an_error() {
        let mut rng = SmallRng::seed_from_u64(3);
        let err = random_between(&mut rng, &Value::text("-1.5e308"), &Value::text("1.5e308"))
            .expect_err("span overflows");
        assert!(matches!(err, HatchError::Runtime(_)), "{err}");

        let v = random_between(&mut rng, &Value::text("-1.5e307"), &Value::text("1.5e307"))
            .expect("wide but finite");
        let n = v.to_number().expect("number");
        assert!((-1.5e307..=1.5e307).contains(&n), "{n}");
    }

    #[test]
    fn modulo_follows_divisor_sign() {
        assert_eq!(modulo(7.0, 3.0), 1.0);
        assert_eq!(modulo(-7.0, 3.0), 2.0);
        assert_eq!(modulo(7.0, -3.0), -2.0);
        assert!(modulo(1.0, 0.0).is_nan());
    }

    #[test]
    fn math_functions_use_degrees() {
        assert!((math_op("sin", 90.0).expect("sin") - 1.0).abs() < 1e-12);
        assert!((math_op("atan", 1.0).expect("atan") - 45.0).abs() < 1e-12);
        assert_eq!(math_op("10 ^", 2.0).expect("pow"), 100.0);
        assert!((math_op("e ^", 1.0).expect("exp") - std::f64::consts::E).abs() < 1e-12);
        assert!(math_op("cube", 1.0).is_err());
    }

    #[test]
    fn letters_are_one_based() {
        assert_eq!(letter_of(1.0, "héllo").expect("first"), "h");
        assert_eq!(letter_of(2.0, "héllo").expect("second"), "é");
        assert!(letter_of(0.0, "abc").is_err());
        assert!(letter_of(4.0, "abc").is_err());
    }

    #[test]
    fn empty_text_reads_as_zero() {
        assert_eq!(number(&Value::text(""), "t").expect("zero"), 0.0);
        assert_eq!(number(&Value::text(" 4 "), "t").expect("four"), 4.0);
        assert!(number(&Value::text("four"), "t").is_err());
        assert!(contains("Hello", "ELL"));
    }
}
