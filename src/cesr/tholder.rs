//! Tholder: signing threshold descriptor.
//!
//! A threshold is either an unweighted count (hex string in events) or
//! clauses of rational weights, every clause of which must sum to at
//! least one among the signing indices for satisfaction.

use num_rational::Ratio;

use crate::errors::MatterError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Thold {
    Num(u64),
    Weighted(Vec<Vec<Ratio<u64>>>),
}

/// Signing threshold with satisfaction logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tholder {
    thold: Thold,
}

fn parse_fraction(text: &str) -> Result<Ratio<u64>, MatterError> {
    let text = text.trim();
    if let Some((n, d)) = text.split_once('/') {
        let numer: u64 = n
            .parse()
            .map_err(|_| MatterError::InvalidMaterial(text.to_string()))?;
        let denom: u64 = d
            .parse()
            .map_err(|_| MatterError::InvalidMaterial(text.to_string()))?;
        if denom == 0 {
            return Err(MatterError::InvalidMaterial(text.to_string()));
        }
        Ok(Ratio::new(numer, denom))
    } else {
        let numer: u64 = text
            .parse()
            .map_err(|_| MatterError::InvalidMaterial(text.to_string()))?;
        Ok(Ratio::from_integer(numer))
    }
}

fn format_fraction(r: &Ratio<u64>) -> String {
    if *r.denom() == 1 {
        format!("{}", r.numer())
    } else {
        format!("{}/{}", r.numer(), r.denom())
    }
}

impl Tholder {
    /// Unweighted threshold.
    pub fn from_num(num: u64) -> Self {
        Tholder {
            thold: Thold::Num(num),
        }
    }

    /// From the lowercase hex rendering used in event `kt`/`nt` fields.
    pub fn from_hex(sith: &str) -> Result<Self, MatterError> {
        let num = u64::from_str_radix(sith, 16)
            .map_err(|_| MatterError::InvalidMaterial(sith.to_string()))?;
        Ok(Self::from_num(num))
    }

    /// From weighted clauses of fraction strings. Each clause must sum to
    /// at least one, each weight must not exceed one.
    pub fn from_clauses(clauses: &[Vec<String>]) -> Result<Self, MatterError> {
        if clauses.is_empty() {
            return Err(MatterError::EmptyMaterial);
        }
        let one = Ratio::from_integer(1u64);
        let mut parsed = Vec::with_capacity(clauses.len());
        for clause in clauses {
            if clause.is_empty() {
                return Err(MatterError::EmptyMaterial);
            }
            let weights = clause
                .iter()
                .map(|w| parse_fraction(w))
                .collect::<Result<Vec<_>, _>>()?;
            if weights.iter().any(|w| *w > one) {
                return Err(MatterError::InvalidMaterial(format!("{clause:?}")));
            }
            if weights.iter().copied().sum::<Ratio<u64>>() < one {
                return Err(MatterError::InvalidMaterial(format!("{clause:?}")));
            }
            parsed.push(weights);
        }
        Ok(Tholder {
            thold: Thold::Weighted(parsed),
        })
    }

    /// From the compact `limen` rendering: lowercase hex for unweighted,
    /// clauses joined by `&` with `,` separated fractions for weighted.
    pub fn from_limen(limen: &str) -> Result<Self, MatterError> {
        if limen.contains(',') || limen.contains('/') || limen.contains('&') {
            let clauses: Vec<Vec<String>> = limen
                .split('&')
                .map(|c| c.split(',').map(|w| w.to_string()).collect())
                .collect();
            Self::from_clauses(&clauses)
        } else {
            Self::from_hex(limen)
        }
    }

    pub fn weighted(&self) -> bool {
        matches!(self.thold, Thold::Weighted(_))
    }

    /// The unweighted count, when unweighted.
    pub fn num(&self) -> Option<u64> {
        match &self.thold {
            Thold::Num(n) => Some(*n),
            Thold::Weighted(_) => None,
        }
    }

    /// Minimum number of keys the threshold presumes.
    pub fn size(&self) -> usize {
        match &self.thold {
            Thold::Num(n) => *n as usize,
            Thold::Weighted(clauses) => clauses.iter().map(|c| c.len()).sum(),
        }
    }

    /// Compact serialization used in next-key commitments.
    pub fn limen(&self) -> String {
        match &self.thold {
            Thold::Num(n) => format!("{n:x}"),
            Thold::Weighted(clauses) => clauses
                .iter()
                .map(|c| {
                    c.iter()
                        .map(format_fraction)
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .collect::<Vec<_>>()
                .join("&"),
        }
    }

    /// The event field value: hex string or clauses of fraction strings.
    pub fn sith(&self) -> serde_json::Value {
        match &self.thold {
            Thold::Num(n) => serde_json::Value::String(format!("{n:x}")),
            Thold::Weighted(clauses) => {
                let arrays: Vec<serde_json::Value> = clauses
                    .iter()
                    .map(|c| {
                        serde_json::Value::Array(
                            c.iter()
                                .map(|w| serde_json::Value::String(format_fraction(w)))
                                .collect(),
                        )
                    })
                    .collect();
                if arrays.len() == 1 {
                    arrays.into_iter().next().unwrap()
                } else {
                    serde_json::Value::Array(arrays)
                }
            }
        }
    }

    /// True if the distinct signer indices satisfy the threshold.
    pub fn satisfy(&self, indices: &[u32]) -> bool {
        let mut seen: Vec<u32> = indices.to_vec();
        seen.sort_unstable();
        seen.dedup();
        match &self.thold {
            Thold::Num(n) => seen.len() as u64 >= *n,
            Thold::Weighted(clauses) => {
                let one = Ratio::from_integer(1u64);
                let mut offset = 0usize;
                for clause in clauses {
                    let sum: Ratio<u64> = clause
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| seen.contains(&((offset + i) as u32)))
                        .map(|(_, w)| *w)
                        .sum();
                    if sum < one {
                        return false;
                    }
                    offset += clause.len();
                }
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tholder_unweighted() {
        let tholder = Tholder::from_hex("2").unwrap();
        assert!(!tholder.weighted());
        assert_eq!(tholder.num(), Some(2));
        assert_eq!(tholder.size(), 2);
        assert_eq!(tholder.limen(), "2");
        assert!(tholder.satisfy(&[0, 2]));
        assert!(tholder.satisfy(&[0, 1, 2]));
        assert!(!tholder.satisfy(&[1]));
        assert!(!tholder.satisfy(&[1, 1]));

        let big = Tholder::from_hex("a").unwrap();
        assert_eq!(big.num(), Some(10));
    }

    #[test]
    fn test_tholder_weighted() {
        let clauses = vec![vec![
            "1/2".to_string(),
            "1/2".to_string(),
            "1/4".to_string(),
            "1/4".to_string(),
            "1/4".to_string(),
        ]];
        let tholder = Tholder::from_clauses(&clauses).unwrap();
        assert!(tholder.weighted());
        assert_eq!(tholder.size(), 5);
        assert_eq!(tholder.limen(), "1/2,1/2,1/4,1/4,1/4");
        assert!(tholder.satisfy(&[0, 1]));
        assert!(tholder.satisfy(&[1, 2, 3, 4]));
        assert!(!tholder.satisfy(&[0, 2]));
        assert!(!tholder.satisfy(&[2, 3, 4]));
    }

    #[test]
    fn test_tholder_multi_clause() {
        let clauses = vec![
            vec!["1/2".to_string(), "1/2".to_string()],
            vec!["1".to_string()],
        ];
        let tholder = Tholder::from_clauses(&clauses).unwrap();
        assert_eq!(tholder.limen(), "1/2,1/2&1");
        assert!(tholder.satisfy(&[0, 1, 2]));
        assert!(!tholder.satisfy(&[0, 1]));
        assert!(!tholder.satisfy(&[2]));

        let again = Tholder::from_limen(&tholder.limen()).unwrap();
        assert_eq!(again, tholder);
    }

    #[test]
    fn test_tholder_invalid() {
        assert!(Tholder::from_hex("xyz").is_err());
        // clause sums below one are invalid
        assert!(Tholder::from_clauses(&[vec!["1/2".to_string(), "1/4".to_string()]]).is_err());
        // weights above one are invalid
        assert!(Tholder::from_clauses(&[vec!["2".to_string()]]).is_err());
    }
}
