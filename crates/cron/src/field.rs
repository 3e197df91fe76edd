//! Single cron field parsing: `*`, numbers, ranges, steps, comma lists.

use crate::CronParseError;

/// Which of the five cron positions a field occupies. Determines bounds
/// and day-of-week normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl FieldKind {
    fn bounds(self) -> (u32, u32) {
        match self {
            Self::Minute => (0, 59),
            Self::Hour => (0, 23),
            Self::DayOfMonth => (1, 31),
            Self::Month => (1, 12),
            // 0 and 7 both mean Sunday; 7 is folded onto 0 after parsing.
            Self::DayOfWeek => (0, 7),
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::DayOfMonth => "day-of-month",
            Self::Month => "month",
            Self::DayOfWeek => "day-of-week",
        };
        write!(f, "{}", name)
    }
}

/// The set of values a single cron field allows, as a bitmask.
#[derive(Debug, Clone)]
pub struct CronField {
    kind: FieldKind,
    mask: u64,
}

impl CronField {
    /// Parse one field token (possibly a comma list of atoms).
    pub fn parse(token: &str, kind: FieldKind) -> Result<Self, CronParseError> {
        if token.is_empty() {
            return Err(invalid(kind, token, "empty field"));
        }

        let mut mask: u64 = 0;
        for part in token.split(',') {
            mask |= parse_atom(part, kind)?;
        }

        let mut field = Self { kind, mask };
        if kind == FieldKind::DayOfWeek {
            field.fold_sunday();
        }
        Ok(field)
    }

    /// Whether `value` is in the allowed set. Day-of-week values of 7 are
    /// normalized to 0 symmetrically with the pattern side.
    pub fn matches(&self, value: u32) -> bool {
        let v = if self.kind == FieldKind::DayOfWeek && value == 7 {
            0
        } else {
            value
        };
        v < 64 && self.mask & (1u64 << v) != 0
    }

    /// Allowed values in ascending order.
    pub fn values(&self) -> impl Iterator<Item = u32> + '_ {
        let (lo, hi) = self.kind.bounds();
        (lo..=hi).filter(|&v| self.mask & (1u64 << v) != 0)
    }

    /// Merge bit 7 (Sunday alias) into bit 0.
    fn fold_sunday(&mut self) {
        if self.mask & (1u64 << 7) != 0 {
            self.mask |= 1;
            self.mask &= !(1u64 << 7);
        }
    }
}

/// Parse one atom: `*`, `*/S`, `N`, `N-M`, or `N-M/S`.
fn parse_atom(atom: &str, kind: FieldKind) -> Result<u64, CronParseError> {
    let (lo, hi) = kind.bounds();

    let (range_part, step) = match atom.split_once('/') {
        Some((r, s)) => {
            let step: u32 = s
                .parse()
                .map_err(|_| invalid(kind, atom, "step is not a number"))?;
            if step == 0 {
                return Err(invalid(kind, atom, "step must be >= 1"));
            }
            (r, step)
        }
        None => (atom, 1),
    };

    let (start, end) = if range_part == "*" {
        (lo, hi)
    } else if let Some((a, b)) = range_part.split_once('-') {
        let a: u32 = a
            .parse()
            .map_err(|_| invalid(kind, atom, "range start is not a number"))?;
        let b: u32 = b
            .parse()
            .map_err(|_| invalid(kind, atom, "range end is not a number"))?;
        if a > b {
            return Err(invalid(kind, atom, "range start exceeds range end"));
        }
        (a, b)
    } else {
        let n: u32 = range_part
            .parse()
            .map_err(|_| invalid(kind, atom, "not a number"))?;
        (n, n)
    };

    if start < lo || end > hi {
        return Err(invalid(
            kind,
            atom,
            &format!("value out of bounds {}-{}", lo, hi),
        ));
    }

    let mut mask: u64 = 0;
    let mut v = start;
    while v <= end {
        mask |= 1u64 << v;
        v += step;
    }
    Ok(mask)
}

fn invalid(kind: FieldKind, token: &str, reason: &str) -> CronParseError {
    CronParseError::InvalidField {
        kind,
        token: token.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_covers_full_range() {
        let f = CronField::parse("*", FieldKind::Hour).unwrap();
        assert_eq!(f.values().count(), 24);
        assert!(f.matches(0));
        assert!(f.matches(23));
    }

    #[test]
    fn step_from_star() {
        let f = CronField::parse("*/15", FieldKind::Minute).unwrap();
        assert_eq!(f.values().collect::<Vec<_>>(), vec![0, 15, 30, 45]);
    }

    #[test]
    fn range_with_step() {
        let f = CronField::parse("10-50/10", FieldKind::Minute).unwrap();
        assert_eq!(f.values().collect::<Vec<_>>(), vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn comma_list_unions() {
        let f = CronField::parse("1,3,5-7", FieldKind::Hour).unwrap();
        assert_eq!(f.values().collect::<Vec<_>>(), vec![1, 3, 5, 6, 7]);
    }

    #[test]
    fn sunday_alias_folds_both_ways() {
        let f = CronField::parse("7", FieldKind::DayOfWeek).unwrap();
        assert!(f.matches(0));
        assert!(f.matches(7));

        let f = CronField::parse("0", FieldKind::DayOfWeek).unwrap();
        assert!(f.matches(0));
        assert!(f.matches(7));
    }

    #[test]
    fn rejects_out_of_bounds_and_garbage() {
        assert!(CronField::parse("60", FieldKind::Minute).is_err());
        assert!(CronField::parse("5-2", FieldKind::Hour).is_err());
        assert!(CronField::parse("*/0", FieldKind::Minute).is_err());
        assert!(CronField::parse("a-b", FieldKind::Month).is_err());
        assert!(CronField::parse("", FieldKind::Month).is_err());
    }
}
