use super::matcher::matches;
use super::table::SuffixTable;

/// Name that is never blocked, whatever the tables contain.
pub const LOCALHOST: &str = "localhost.";

/// Raw match results against both tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    pub blocked: bool,
    pub allowed: bool,
}

/// What the request handler does with a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Answer with the configured block response and stop the pipeline.
    Block,
    /// Matched the block table but the allow table overrides it.
    Allow,
    /// Not blocked; hand over to the next stage untouched.
    Pass,
}

impl Classification {
    pub fn decision(self) -> Decision {
        match (self.blocked, self.allowed) {
            (true, false) => Decision::Block,
            (true, true) => Decision::Allow,
            (false, _) => Decision::Pass,
        }
    }
}

/// Classifies a normalized `name` against the block and allow tables.
///
/// Both walks always run for anything other than localhost. Each walk works
/// on a single snapshot of its table.
pub fn classify(name: &str, block: &SuffixTable, allow: &SuffixTable) -> Classification {
    if name == LOCALHOST {
        return Classification::default();
    }

    let blocked = matches(name, &block.snapshot());
    let allowed = matches(name, &allow.snapshot());

    Classification { blocked, allowed }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(block: &[&str], allow: &[&str]) -> (SuffixTable, SuffixTable) {
        let b = SuffixTable::new();
        b.replace(block.iter().collect());
        let a = SuffixTable::new();
        a.replace(allow.iter().collect());
        (b, a)
    }

    fn decide(block: &[&str], allow: &[&str], name: &str) -> Decision {
        let (b, a) = tables(block, allow);
        classify(name, &b, &a).decision()
    }

    #[test]
    fn test_blocked_exact() {
        assert_eq!(decide(&["bad.domain."], &[], "bad.domain."), Decision::Block);
    }

    #[test]
    fn test_blocked_by_parent() {
        assert_eq!(
            decide(&["bad.domain."], &[], "child.bad.domain."),
            Decision::Block
        );
    }

    #[test]
    fn test_child_entry_does_not_block_parent() {
        assert_eq!(
            decide(&["child.bad.domain."], &[], "bad.domain."),
            Decision::Pass
        );
    }

    #[test]
    fn test_root_blocks_everything() {
        assert_eq!(decide(&["."], &[], "anything.tld."), Decision::Block);
    }

    #[test]
    fn test_allow_only_match_passes() {
        assert_eq!(
            decide(&["sub.bad.domain."], &["good.domain."], "sub.good.domain."),
            Decision::Pass
        );
    }

    #[test]
    fn test_allow_overrides_more_specific_block() {
        assert_eq!(
            decide(&["sub.good.domain."], &["good.domain."], "sub.good.domain."),
            Decision::Allow
        );
        assert_eq!(
            decide(&["bad.domain."], &["allow.bad.domain."], "allow.bad.domain."),
            Decision::Allow
        );
    }

    #[test]
    fn test_localhost_exempt() {
        assert_eq!(decide(&["bad.domain."], &[], "localhost."), Decision::Pass);
        assert_eq!(decide(&["localhost."], &[], "localhost."), Decision::Pass);
        assert_eq!(decide(&["."], &[], "localhost."), Decision::Pass);

        let (b, a) = tables(&["localhost."], &["localhost."]);
        assert_eq!(classify("localhost.", &b, &a), Classification::default());
    }

    #[test]
    fn test_both_flags_reported() {
        let (b, a) = tables(&["bad.domain."], &["domain."]);
        let c = classify("x.bad.domain.", &b, &a);
        assert!(c.blocked);
        assert!(c.allowed);
    }

    #[test]
    fn test_subdomain_of_localhost_not_exempt() {
        assert_eq!(
            decide(&["localhost."], &[], "evil.localhost."),
            Decision::Block
        );
    }
}
