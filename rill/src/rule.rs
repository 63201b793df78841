//! Rules: the three operators that connect a query to a target collection.

use rill_basics::{CollectionKind, RuleId};

use crate::builder::CollectionHandle;
use crate::collection::CollectionId;
use crate::ra::Expr;

/// How a rule applies its query's rows to its target.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RuleKind {
    /// `<=`: merge applied when the rule is evaluated, visible to the rules
    /// after it in the same tick.
    Merge,
    /// `+=`: merge staged during evaluation and committed at the end of the
    /// tick.
    DeferredMerge,
    /// `-=`: delete staged during evaluation and committed at the end of
    /// the tick, after all deferred merges.
    DeferredDelete,
}

impl RuleKind {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            RuleKind::Merge => "<=",
            RuleKind::DeferredMerge => "+=",
            RuleKind::DeferredDelete => "-=",
        }
    }
}

/// One declared rule. Rules are created against collection handles, given
/// ids in declaration order at registration, and are immutable afterwards.
pub struct Rule {
    pub(crate) id: RuleId,
    pub(crate) target: CollectionId,
    pub(crate) target_name: String,
    pub(crate) target_kind: CollectionKind,
    pub(crate) kind: RuleKind,
    pub(crate) expr: Expr,
}

impl Rule {
    fn new(target: &CollectionHandle, kind: RuleKind, expr: Expr) -> Rule {
        Rule {
            id: 0,
            target: target.id(),
            target_name: target.name().to_owned(),
            target_kind: target.kind(),
            kind,
            expr,
        }
    }

    /// `target <= expr`
    pub fn merge(target: &CollectionHandle, expr: Expr) -> Rule {
        Rule::new(target, RuleKind::Merge, expr)
    }

    /// `target += expr`
    pub fn deferred_merge(target: &CollectionHandle, expr: Expr) -> Rule {
        Rule::new(target, RuleKind::DeferredMerge, expr)
    }

    /// `target -= expr`
    pub fn deferred_delete(target: &CollectionHandle, expr: Expr) -> Rule {
        Rule::new(target, RuleKind::DeferredDelete, expr)
    }

    /// The canonical text of this rule, e.g. `t <= Count(t)`.
    pub fn text(&self) -> String {
        format!("{} {} {}", self.target_name, self.kind.symbol(), self.expr)
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }
}
