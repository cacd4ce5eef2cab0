//! Statistics primitives.
//!
//! Degenerate inputs never produce errors or NaN: they resolve to a defined
//! value plus a [`StatWarning`].

use std::f64::consts::SQRT_2;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a t-test result is not a regular Welch estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatWarning {
    InsufficientSamples,
    ZeroVariance,
    ZeroStandardError,
}

impl fmt::Display for StatWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatWarning::InsufficientSamples => write!(f, "Insufficient samples (n < 2)"),
            StatWarning::ZeroVariance => {
                write!(f, "Zero variance in both groups (all values identical)")
            }
            StatWarning::ZeroStandardError => write!(f, "Zero standard error"),
        }
    }
}

/// Qualitative band of Cohen's d.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectSize {
    Negligible,
    Small,
    Medium,
    Large,
}

impl EffectSize {
    pub fn from_d(d: f64) -> Self {
        let d = d.abs();
        if d < 0.2 {
            EffectSize::Negligible
        } else if d < 0.5 {
            EffectSize::Small
        } else if d < 0.8 {
            EffectSize::Medium
        } else {
            EffectSize::Large
        }
    }
}

impl fmt::Display for EffectSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectSize::Negligible => write!(f, "negligible"),
            EffectSize::Small => write!(f, "small"),
            EffectSize::Medium => write!(f, "medium"),
            EffectSize::Large => write!(f, "large"),
        }
    }
}

/// Outcome of [`welch_t_test`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchTest {
    /// Positive when the second sample has the larger mean.
    pub t_statistic: f64,
    pub p_value: f64,
    pub degrees_of_freedom: f64,
    pub warning: Option<StatWarning>,
}

impl WelchTest {
    fn degenerate(t_statistic: f64, p_value: f64, warning: StatWarning) -> Self {
        Self {
            t_statistic,
            p_value,
            degrees_of_freedom: 0.0,
            warning: Some(warning),
        }
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance with an (n - 1) denominator; `0.0` below two samples.
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Welch's t-test for samples with unequal variances.
///
/// The two-sided p-value uses the standard normal tail instead of the
/// Student distribution, which overstates significance for small samples.
pub fn welch_t_test(first: &[f64], second: &[f64]) -> WelchTest {
    let (n1, n2) = (first.len(), second.len());
    if n1 < 2 || n2 < 2 {
        return WelchTest::degenerate(0.0, 1.0, StatWarning::InsufficientSamples);
    }

    let (mean1, mean2) = (mean(first), mean(second));
    let (var1, var2) = (variance(first), variance(second));

    if var1 == 0.0 && var2 == 0.0 {
        if mean1 == mean2 {
            return WelchTest::degenerate(0.0, 1.0, StatWarning::ZeroVariance);
        }
        let t = if mean2 > mean1 {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        };
        return WelchTest::degenerate(t, 0.0, StatWarning::ZeroVariance);
    }

    let (n1f, n2f) = (n1 as f64, n2 as f64);
    let se = (var1 / n1f + var2 / n2f).sqrt();
    if se == 0.0 {
        return WelchTest::degenerate(0.0, 1.0, StatWarning::ZeroStandardError);
    }

    let t = (mean2 - mean1) / se;

    let denominator: f64 = [(var1, n1f), (var2, n2f)]
        .iter()
        .filter(|(var, _)| *var > 0.0)
        .map(|(var, n)| (var / n).powi(2) / (n - 1.0))
        .sum();
    let degrees_of_freedom = if denominator > 0.0 {
        (var1 / n1f + var2 / n2f).powi(2) / denominator
    } else {
        (n1 + n2 - 2) as f64
    };

    WelchTest {
        t_statistic: t,
        p_value: two_sided_normal_p(t),
        degrees_of_freedom,
        warning: None,
    }
}

/// Cohen's d with pooled standard deviation, `(mean2 - mean1) / pooled`.
///
/// `0.0` when either sample has fewer than two observations or the pooled
/// deviation is zero.
pub fn cohens_d(first: &[f64], second: &[f64]) -> f64 {
    let (n1, n2) = (first.len(), second.len());
    if n1 < 2 || n2 < 2 {
        return 0.0;
    }
    let pooled = (((n1 - 1) as f64 * variance(first) + (n2 - 1) as f64 * variance(second))
        / (n1 + n2 - 2) as f64)
        .sqrt();
    if pooled == 0.0 {
        return 0.0;
    }
    (mean(second) - mean(first)) / pooled
}

/// Standard normal cumulative distribution.
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// `2 * (1 - Φ(|t|))`, computed through the complementary error function.
fn two_sided_normal_p(t: f64) -> f64 {
    erfc(t.abs() / SQRT_2).clamp(0.0, 1.0)
}

/// Complementary error function, Chebyshev fit with fractional error below 1.2e-7.
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let r = t * poly.exp();
    if x >= 0.0 {
        r
    } else {
        2.0 - r
    }
}
