//! The check-node operator table
//!
//! Every comparison operator takes two rendered strings `(observed,
//! comparand)` and produces an [`OpOutcome`]. Dispatch is a tagged enum plus
//! one match expression so call sites stay inlinable.

/// Outcome of applying one operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpOutcome {
    /// Whether the comparison held
    pub matched: bool,
    /// Whether the observed value was actually inspected; vacuous results
    /// (empty comparand, failed numeric parse) report `false` here
    pub hit: bool,
}

impl OpOutcome {
    /// A result that inspected the observed value
    pub fn hit(matched: bool) -> Self {
        Self { matched, hit: true }
    }

    /// A result decided without inspecting the observed value
    pub fn vacuous(matched: bool) -> Self {
        Self {
            matched,
            hit: false,
        }
    }
}

/// Named comparison operators usable as a check-node type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Observed starts with comparand
    Start,
    /// Observed ends with comparand
    End,
    /// Observed does not start with comparand
    NStart,
    /// Observed does not end with comparand
    NEnd,
    /// Observed contains comparand
    Incl,
    /// Observed does not contain comparand
    Ni,
    /// Case-insensitive `Start`
    NcsStart,
    /// Case-insensitive `End`
    NcsEnd,
    /// Case-insensitive `NStart`
    NcsNStart,
    /// Case-insensitive `NEnd`
    NcsNEnd,
    /// Case-insensitive `Incl`
    NcsIncl,
    /// Case-insensitive `Ni`
    NcsNi,
    /// Case-insensitive equality
    Equ,
    /// Case-insensitive inequality
    Neq,
    /// Explicitly case-insensitive equality
    NcsEqu,
    /// Explicitly case-insensitive inequality
    NcsNeq,
    /// Numeric more-than
    Mt,
    /// Numeric less-than
    Lt,
    /// Observed is absent or empty
    IsNull,
    /// Observed is present and non-empty
    NotNull,
}

impl OpKind {
    /// Resolve an operator from its ruleset name
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "START" => OpKind::Start,
            "END" => OpKind::End,
            "NSTART" => OpKind::NStart,
            "NEND" => OpKind::NEnd,
            "INCL" => OpKind::Incl,
            "NI" => OpKind::Ni,
            "NCS_START" => OpKind::NcsStart,
            "NCS_END" => OpKind::NcsEnd,
            "NCS_NSTART" => OpKind::NcsNStart,
            "NCS_NEND" => OpKind::NcsNEnd,
            "NCS_INCL" => OpKind::NcsIncl,
            "NCS_NI" => OpKind::NcsNi,
            "EQU" => OpKind::Equ,
            "NEQ" => OpKind::Neq,
            "NCS_EQU" => OpKind::NcsEqu,
            "NCS_NEQ" => OpKind::NcsNeq,
            "MT" => OpKind::Mt,
            "LT" => OpKind::Lt,
            "ISNULL" => OpKind::IsNull,
            "NOTNULL" => OpKind::NotNull,
            _ => return None,
        })
    }

    /// The ruleset name of this operator
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Start => "START",
            OpKind::End => "END",
            OpKind::NStart => "NSTART",
            OpKind::NEnd => "NEND",
            OpKind::Incl => "INCL",
            OpKind::Ni => "NI",
            OpKind::NcsStart => "NCS_START",
            OpKind::NcsEnd => "NCS_END",
            OpKind::NcsNStart => "NCS_NSTART",
            OpKind::NcsNEnd => "NCS_NEND",
            OpKind::NcsIncl => "NCS_INCL",
            OpKind::NcsNi => "NCS_NI",
            OpKind::Equ => "EQU",
            OpKind::Neq => "NEQ",
            OpKind::NcsEqu => "NCS_EQU",
            OpKind::NcsNeq => "NCS_NEQ",
            OpKind::Mt => "MT",
            OpKind::Lt => "LT",
            OpKind::IsNull => "ISNULL",
            OpKind::NotNull => "NOTNULL",
        }
    }

    /// Whether this operator inspects the comparand at all
    pub fn is_unary(&self) -> bool {
        matches!(self, OpKind::IsNull | OpKind::NotNull)
    }

    /// Apply the operator to an observed value and a comparand
    pub fn apply(&self, observed: &str, comparand: &str) -> OpOutcome {
        match self {
            OpKind::IsNull => OpOutcome::hit(observed.is_empty()),
            OpKind::NotNull => OpOutcome::hit(!observed.is_empty()),

            OpKind::Mt | OpKind::Lt => {
                let (Ok(lhs), Ok(rhs)) = (observed.parse::<f64>(), comparand.parse::<f64>())
                else {
                    return OpOutcome::vacuous(false);
                };
                match self {
                    OpKind::Mt => OpOutcome::hit(lhs > rhs),
                    _ => OpOutcome::hit(lhs < rhs),
                }
            }

            // The string family shares the empty-value edge rules: an empty
            // comparand is vacuously satisfied; an empty observed value fails
            // every check except the non-containment pair.
            _ => {
                if comparand.is_empty() {
                    return OpOutcome::vacuous(true);
                }
                if observed.is_empty() {
                    let vacuously_true = matches!(self, OpKind::Ni | OpKind::NcsNi);
                    return OpOutcome::vacuous(vacuously_true);
                }
                OpOutcome::hit(self.string_match(observed, comparand))
            }
        }
    }

    fn string_match(&self, observed: &str, comparand: &str) -> bool {
        match self {
            OpKind::Start => observed.starts_with(comparand),
            OpKind::End => observed.ends_with(comparand),
            OpKind::NStart => !observed.starts_with(comparand),
            OpKind::NEnd => !observed.ends_with(comparand),
            OpKind::Incl => observed.contains(comparand),
            OpKind::Ni => !observed.contains(comparand),
            OpKind::NcsStart => starts_with_ignore_case(observed, comparand),
            OpKind::NcsEnd => ends_with_ignore_case(observed, comparand),
            OpKind::NcsNStart => !starts_with_ignore_case(observed, comparand),
            OpKind::NcsNEnd => !ends_with_ignore_case(observed, comparand),
            OpKind::NcsIncl => contains_ignore_case(observed, comparand),
            OpKind::NcsNi => !contains_ignore_case(observed, comparand),
            OpKind::Equ | OpKind::NcsEqu => observed.eq_ignore_ascii_case(comparand),
            OpKind::Neq | OpKind::NcsNeq => !observed.eq_ignore_ascii_case(comparand),
            OpKind::Mt | OpKind::Lt | OpKind::IsNull | OpKind::NotNull => unreachable!(),
        }
    }
}

fn starts_with_ignore_case(value: &str, token: &str) -> bool {
    value.len() >= token.len() && value.is_char_boundary(token.len())
        && value[..token.len()].eq_ignore_ascii_case(token)
}

fn ends_with_ignore_case(value: &str, token: &str) -> bool {
    if value.len() < token.len() {
        return false;
    }
    let start = value.len() - token.len();
    value.is_char_boundary(start) && value[start..].eq_ignore_ascii_case(token)
}

fn contains_ignore_case(value: &str, token: &str) -> bool {
    value
        .to_ascii_lowercase()
        .contains(&token.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_full_table() {
        for name in [
            "START",
            "END",
            "NSTART",
            "NEND",
            "INCL",
            "NI",
            "NCS_START",
            "NCS_END",
            "NCS_NSTART",
            "NCS_NEND",
            "NCS_INCL",
            "NCS_NI",
            "EQU",
            "NEQ",
            "NCS_EQU",
            "NCS_NEQ",
            "MT",
            "LT",
            "ISNULL",
            "NOTNULL",
        ] {
            let op = OpKind::from_name(name).expect(name);
            assert_eq!(op.name(), name);
        }
        assert!(OpKind::from_name("REGEX").is_none());
        assert!(OpKind::from_name("equ").is_none());
    }

    #[test]
    fn test_boundary_operators() {
        assert!(OpKind::Start.apply("/admin/login", "/admin").matched);
        assert!(!OpKind::Start.apply("/login", "/admin").matched);
        assert!(OpKind::End.apply("evil.exe", ".exe").matched);
        assert!(OpKind::NStart.apply("/login", "/admin").matched);
        assert!(OpKind::NEnd.apply("evil.dll", ".exe").matched);
    }

    #[test]
    fn test_containment() {
        assert!(OpKind::Incl.apply("/admin/login", "admin").matched);
        assert!(OpKind::Ni.apply("/login", "admin").matched);
        assert!(!OpKind::Ni.apply("/admin", "admin").matched);
    }

    #[test]
    fn test_case_insensitive_variants() {
        assert!(OpKind::NcsStart.apply("PowerShell.exe", "powershell").matched);
        assert!(OpKind::NcsEnd.apply("script.PS1", ".ps1").matched);
        assert!(OpKind::NcsIncl.apply("CMD /C whoami", "cmd").matched);
        assert!(!OpKind::NcsNi.apply("CMD /C whoami", "cmd").matched);
    }

    #[test]
    fn test_equality() {
        assert!(OpKind::Equ.apply("Admin", "admin").matched);
        assert!(!OpKind::Neq.apply("Admin", "admin").matched);
        assert!(OpKind::NcsEqu.apply("ROOT", "root").matched);
        assert!(OpKind::NcsNeq.apply("root", "toor").matched);
    }

    #[test]
    fn test_numeric() {
        assert!(OpKind::Mt.apply("10", "9.5").matched);
        assert!(OpKind::Lt.apply("-3", "0").matched);
        let outcome = OpKind::Mt.apply("ten", "9");
        assert!(!outcome.matched);
        assert!(!outcome.hit);
    }

    #[test]
    fn test_nullness() {
        assert!(OpKind::IsNull.apply("", "ignored").matched);
        assert!(!OpKind::IsNull.apply("x", "").matched);
        assert!(OpKind::NotNull.apply("x", "").matched);
    }

    #[test]
    fn test_empty_value_edge_rules() {
        // Empty comparand is vacuously satisfied across the string family
        let outcome = OpKind::Incl.apply("anything", "");
        assert!(outcome.matched);
        assert!(!outcome.hit);
        assert!(OpKind::NStart.apply("anything", "").matched);

        // Empty observed fails, except vacuous non-containment
        assert!(!OpKind::Incl.apply("", "admin").matched);
        assert!(!OpKind::Start.apply("", "admin").matched);
        assert!(OpKind::Ni.apply("", "admin").matched);
        assert!(OpKind::NcsNi.apply("", "admin").matched);
    }
}
