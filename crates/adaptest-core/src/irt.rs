//! Three-parameter logistic response model.
//!
//! P(θ) = c + (1 − c) / (1 + exp(−a(θ − b)))

use crate::model::ItemParams;

/// Probabilities are kept this far away from 0 and 1 so logs and ratios stay finite.
const PROB_FLOOR: f64 = 1e-12;

fn logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Probability of a correct response at ability `theta`.
pub fn probability(params: &ItemParams, theta: f64) -> f64 {
    let ItemParams { a, b, c } = *params;
    c + (1.0 - c) * logistic(a * (theta - b))
}

fn clamped_probability(params: &ItemParams, theta: f64) -> f64 {
    probability(params, theta).clamp(PROB_FLOOR, 1.0 - PROB_FLOOR)
}

/// Fisher information of the item at `theta`.
///
/// I(θ) = a² (P − c)² (1 − P) / ((1 − c)² P)
pub fn information(params: &ItemParams, theta: f64) -> f64 {
    let ItemParams { a, c, .. } = *params;
    let p = clamped_probability(params, theta);
    let num = a * a * (p - c).powi(2) * (1.0 - p);
    let den = (1.0 - c).powi(2) * p;
    num / den
}

/// Log-likelihood of a single scored response.
pub fn log_likelihood(params: &ItemParams, theta: f64, correct: bool) -> f64 {
    let p = clamped_probability(params, theta);
    if correct {
        p.ln()
    } else {
        (1.0 - p).ln()
    }
}

/// First and second derivatives of the response log-likelihood in theta.
///
/// L′ = a (P − c)(u − P) / ((1 − c) P)
/// L″ = a² (P − c)(1 − P)(u c − P²) / ((1 − c)² P²)
pub fn log_likelihood_derivatives(params: &ItemParams, theta: f64, correct: bool) -> (f64, f64) {
    let ItemParams { a, c, .. } = *params;
    let p = clamped_probability(params, theta);
    let u = if correct { 1.0 } else { 0.0 };
    let first = a * (p - c) * (u - p) / ((1.0 - c) * p);
    let second = a * a * (p - c) * (1.0 - p) * (u * c - p * p) / ((1.0 - c).powi(2) * p * p);
    (first, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn probability_at_difficulty_is_midpoint_above_guessing() {
        let params = ItemParams::new(1.2, 0.0, 0.2);
        assert!((probability(&params, 0.0) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn information_closed_form() {
        // P = 0.6: 1.44 * 0.16 * 0.4 / (0.64 * 0.6) = 0.24
        let params = ItemParams::new(1.2, 0.0, 0.2);
        let info = information(&params, 0.0);
        assert!((info - 0.24).abs() < 1e-9, "got {info}");
        // Per unit of a², the same item carries 1/6 at its difficulty.
        assert!((info / (1.2 * 1.2) - 0.1667).abs() < 1e-3);
    }

    #[test]
    fn two_pl_information_is_a_squared_pq() {
        let params = ItemParams::new(1.5, 0.5, 0.0);
        let p = probability(&params, 1.0);
        let expected = 1.5 * 1.5 * p * (1.0 - p);
        assert!((information(&params, 1.0) - expected).abs() < 1e-9);
    }

    #[test]
    fn extreme_theta_stays_finite() {
        let params = ItemParams::new(3.0, 0.0, 0.25);
        for theta in [-1e6, -50.0, 50.0, 1e6] {
            assert!(probability(&params, theta).is_finite());
            assert!(information(&params, theta).is_finite());
            assert!(log_likelihood(&params, theta, true).is_finite());
            assert!(log_likelihood(&params, theta, false).is_finite());
        }
    }

    #[test]
    fn derivative_matches_finite_difference() {
        let params = ItemParams::new(1.1, -0.3, 0.15);
        let h = 1e-5;
        for correct in [true, false] {
            let theta = 0.4;
            let numeric = (log_likelihood(&params, theta + h, correct)
                - log_likelihood(&params, theta - h, correct))
                / (2.0 * h);
            let (first, _) = log_likelihood_derivatives(&params, theta, correct);
            assert!((numeric - first).abs() < 1e-6, "{numeric} vs {first}");

            let (f_plus, _) = log_likelihood_derivatives(&params, theta + h, correct);
            let (f_minus, _) = log_likelihood_derivatives(&params, theta - h, correct);
            let (_, second) = log_likelihood_derivatives(&params, theta, correct);
            assert!(((f_plus - f_minus) / (2.0 * h) - second).abs() < 1e-5);
        }
    }

    proptest! {
        #[test]
        fn probability_strictly_increasing(
            a in 0.05f64..3.0,
            b in -2.0f64..2.0,
            c in 0.0f64..0.5,
            theta in -4.0f64..4.0,
            step in 0.01f64..1.0,
        ) {
            let params = ItemParams::new(a, b, c);
            prop_assert!(probability(&params, theta + step) > probability(&params, theta));
        }

        #[test]
        fn information_non_negative(
            a in 0.05f64..4.0,
            b in -3.0f64..3.0,
            c in 0.0f64..0.9,
            theta in -6.0f64..6.0,
        ) {
            let info = information(&ItemParams::new(a, b, c), theta);
            prop_assert!(info.is_finite());
            prop_assert!(info >= 0.0);
        }
    }
}
