use super::BooleanNode;

impl BooleanNode {
    /// Rewrite the condition into an equivalent, flatter form.
    ///
    /// - 'And(x)' => 'x', 'Or(x)' => 'x'
    /// - 'a AND (b AND c)' => 'a AND b AND c' (same for OR)
    /// - 'a AND True' => 'a', 'a AND False' => 'False' (dual for OR)
    /// - 'NOT NOT x' => 'x', 'NOT True' => 'False'
    /// - duplicate children of AND/OR are removed
    ///
    /// The result is a fixpoint: simplifying it again changes nothing.
    pub fn simplify(&self) -> BooleanNode {
        match self {
            BooleanNode::Condition(_) => self.clone(),
            BooleanNode::Not(child) => match child.simplify() {
                BooleanNode::Not(inner) => *inner,
                simplified if simplified.is_always_true() => BooleanNode::always_false(),
                simplified if simplified.is_always_false() => BooleanNode::always_true(),
                simplified => BooleanNode::Not(Box::new(simplified)),
            },
            BooleanNode::And(children) => simplify_combinator(children, Combinator::And),
            BooleanNode::Or(children) => simplify_combinator(children, Combinator::Or),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    And,
    Or,
}

impl Combinator {
    /// The child that makes the whole combinator constant (Or() for AND).
    fn is_absorbing(&self, node: &BooleanNode) -> bool {
        match self {
            Combinator::And => node.is_always_false(),
            Combinator::Or => node.is_always_true(),
        }
    }

    fn build(&self, children: Vec<BooleanNode>) -> BooleanNode {
        match self {
            Combinator::And => BooleanNode::And(children),
            Combinator::Or => BooleanNode::Or(children),
        }
    }

    /// Pulls the children out of a node of the same combinator.
    fn unnest(&self, node: BooleanNode) -> Result<Vec<BooleanNode>, BooleanNode> {
        match (self, node) {
            (Combinator::And, BooleanNode::And(children)) => Ok(children),
            (Combinator::Or, BooleanNode::Or(children)) => Ok(children),
            (_, other) => Err(other),
        }
    }
}

fn simplify_combinator(children: &[BooleanNode], combinator: Combinator) -> BooleanNode {
    let mut out: Vec<BooleanNode> = Vec::with_capacity(children.len());

    for child in children {
        // Simplified children are already flat, so one level of unnesting is
        // enough. Empty identities unnest to nothing.
        let flattened = match combinator.unnest(child.simplify()) {
            Ok(nested) => nested,
            Err(other) => vec![other],
        };

        for node in flattened {
            if combinator.is_absorbing(&node) {
                return node;
            }
            if !out.contains(&node) {
                out.push(node);
            }
        }
    }

    if out.len() == 1 {
        return out.remove(0);
    }

    combinator.build(out)
}
