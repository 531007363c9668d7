//! Expr — integer expressions evaluated inside handlers.

use serde::{Deserialize, Serialize};

/// An integer-valued expression.
///
/// Written as a bare number (`5000`), a property name (`"lifetime"`) or an
/// operator table (`{ op = "add", left = "lifetime", right = 5000 }`).
/// Evaluation is deterministic except for [`Compound::Random`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expr {
    Number(i64),
    /// Current value of a timer or ranged property.
    Property(String),
    Compound(Box<Compound>),
}

/// Operator nodes of [`Expr`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Compound {
    Add { left: Expr, right: Expr },
    Sub { left: Expr, right: Expr },
    Mul { left: Expr, right: Expr },
    /// Number of confirmed neighbors.
    NeighborCount,
    /// Number of neighbors carried by the triggering event, optionally only
    /// those last seen in `state`.
    EventNeighbors {
        #[serde(default)]
        state: Option<String>,
    },
    /// Press count of the triggering click (0 outside click hooks).
    ClickCount,
    /// Uniformly drawn integer in `min..=max`; reversed bounds are swapped.
    Random { min: Expr, max: Expr },
}

impl Expr {
    /// Call `visit` with every property name this expression reads.
    pub fn for_each_property(&self, visit: &mut impl FnMut(&str)) {
        match self {
            Self::Number(_) => {}
            Self::Property(name) => visit(name),
            Self::Compound(compound) => match compound.as_ref() {
                Compound::Add { left, right }
                | Compound::Sub { left, right }
                | Compound::Mul { left, right }
                | Compound::Random {
                    min: left,
                    max: right,
                } => {
                    left.for_each_property(visit);
                    right.for_each_property(visit);
                }
                Compound::NeighborCount
                | Compound::EventNeighbors { .. }
                | Compound::ClickCount => {}
            },
        }
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Self::Property(value.to_string())
    }
}

impl From<Compound> for Expr {
    fn from(value: Compound) -> Self {
        Self::Compound(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_deserialize_number_and_property() {
        let n: Expr = serde_json::from_str("5000").unwrap();
        assert_eq!(n, Expr::Number(5000));
        let p: Expr = serde_json::from_str(r#""lifetime""#).unwrap();
        assert_eq!(p, Expr::from("lifetime"));
    }

    #[test]
    fn should_deserialize_nested_operators() {
        let json = serde_json::json!({
            "op": "add",
            "left": "lifetime",
            "right": {"op": "mul", "left": 5000, "right": {"op": "event_neighbors", "state": "inactive"}}
        });
        let expr: Expr = serde_json::from_value(json).unwrap();
        let Expr::Compound(compound) = expr else {
            panic!("expected compound");
        };
        assert!(matches!(*compound, Compound::Add { .. }));
    }

    #[test]
    fn should_deserialize_random_bounds_from_toml() {
        #[derive(Deserialize)]
        struct Light {
            color: Expr,
        }

        let light: Light =
            toml::from_str("color = { op = 'random', min = 0, max = 0xffffff }").unwrap();
        assert_eq!(
            light.color,
            Compound::Random {
                min: Expr::Number(0),
                max: Expr::Number(0x00ff_ffff),
            }
            .into()
        );
    }

    #[test]
    fn should_visit_random_bounds() {
        let expr: Expr = Compound::Random {
            min: "floor".into(),
            max: "ceiling".into(),
        }
        .into();
        let mut seen = Vec::new();
        expr.for_each_property(&mut |name| seen.push(name.to_string()));
        assert_eq!(seen, vec!["floor", "ceiling"]);
    }

    #[test]
    fn should_visit_every_property_reference() {
        let expr: Expr = Compound::Sub {
            left: "lifetime".into(),
            right: Compound::Mul {
                left: "team".into(),
                right: 3.into(),
            }
            .into(),
        }
        .into();
        let mut seen = Vec::new();
        expr.for_each_property(&mut |name| seen.push(name.to_string()));
        assert_eq!(seen, vec!["lifetime", "team"]);
    }
}
