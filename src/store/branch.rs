//! The `layer<N>_<ID>` branch-naming convention that gives the layer
//! store its chain ordering.

use std::fmt::Display;
use std::str::FromStr;

/// A parsed `layer<N>_<ID>` branch name: `N` is the layer's position in
/// the chain (root = 0), `ID` is the image ID or V2 digest it was
/// built from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Branch {
    pub number: usize,
    pub id: String,
}

impl Branch {
    pub fn new(number: usize, id: impl Into<String>) -> Self {
        Branch {
            number,
            id: id.into(),
        }
    }
}

impl FromStr for Branch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("layer")
            .ok_or_else(|| format!("not a layer branch: {s}"))?;
        let (number, id) = rest
            .split_once('_')
            .ok_or_else(|| format!("malformed layer branch (missing '_'): {s}"))?;
        let number: usize = number
            .parse()
            .map_err(|_| format!("malformed layer branch (non-numeric N): {s}"))?;
        if id.is_empty() {
            return Err(format!("malformed layer branch (empty ID): {s}"));
        }
        Ok(Branch {
            number,
            id: id.to_string(),
        })
    }
}

impl Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "layer{}_{}", self.number, self.id)
    }
}
