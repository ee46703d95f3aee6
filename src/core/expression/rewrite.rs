use super::{ExpressionNode, Reference};
use std::collections::HashMap;
use std::convert::Infallible;

impl ExpressionNode {
    pub fn children(&self) -> Vec<&ExpressionNode> {
        match self {
            ExpressionNode::Constant(_) | ExpressionNode::Generate { .. } => Vec::new(),
            ExpressionNode::Reference(reference) => reference.arguments.iter().collect(),
            ExpressionNode::Arithmetic { left, right, .. } | ExpressionNode::Join { left, right, .. } => {
                vec![left.as_ref(), right.as_ref()]
            }
            ExpressionNode::Negate(argument)
            | ExpressionNode::Reduce { argument, .. }
            | ExpressionNode::Map { argument, .. }
            | ExpressionNode::Rename { argument, .. } => vec![argument.as_ref()],
            ExpressionNode::Function { arguments, .. } => arguments.iter().collect(),
        }
    }

    /// The same node over new children, given in `children()` order.
    pub fn with_children(&self, children: Vec<ExpressionNode>) -> ExpressionNode {
        let mut children = children.into_iter();
        let mut next = |old: &ExpressionNode| children.next().unwrap_or_else(|| old.clone());
        match self {
            ExpressionNode::Constant(_) | ExpressionNode::Generate { .. } => self.clone(),
            ExpressionNode::Reference(reference) => ExpressionNode::Reference(Reference {
                name: reference.name.clone(),
                arguments: reference.arguments.iter().map(&mut next).collect(),
                output: reference.output.clone(),
            }),
            ExpressionNode::Arithmetic {
                operator,
                left,
                right,
            } => ExpressionNode::Arithmetic {
                operator: *operator,
                left: Box::new(next(left.as_ref())),
                right: Box::new(next(right.as_ref())),
            },
            ExpressionNode::Negate(argument) => ExpressionNode::Negate(Box::new(next(argument.as_ref()))),
            ExpressionNode::Function {
                function,
                arguments,
            } => ExpressionNode::Function {
                function: *function,
                arguments: arguments.iter().map(&mut next).collect(),
            },
            ExpressionNode::Reduce {
                argument,
                aggregator,
                dimensions,
            } => ExpressionNode::Reduce {
                argument: Box::new(next(argument.as_ref())),
                aggregator: *aggregator,
                dimensions: dimensions.clone(),
            },
            ExpressionNode::Join { left, right, lambda } => ExpressionNode::Join {
                left: Box::new(next(left.as_ref())),
                right: Box::new(next(right.as_ref())),
                lambda: lambda.clone(),
            },
            ExpressionNode::Map { argument, lambda } => ExpressionNode::Map {
                argument: Box::new(next(argument.as_ref())),
                lambda: lambda.clone(),
            },
            ExpressionNode::Rename { argument, from, to } => ExpressionNode::Rename {
                argument: Box::new(next(argument.as_ref())),
                from: from.clone(),
                to: to.clone(),
            },
        }
    }

    /// Depth-first rewrite: a node the rule replaces is not descended into,
    /// any other node is rebuilt over its rewritten children.
    pub fn try_transform<E, F>(&self, rule: &mut F) -> Result<ExpressionNode, E>
    where
        F: FnMut(&ExpressionNode) -> Result<Option<ExpressionNode>, E>,
    {
        if let Some(replacement) = rule(self)? {
            return Ok(replacement);
        }
        let children = self.children();
        if children.is_empty() {
            return Ok(self.clone());
        }
        let rewritten = children
            .into_iter()
            .map(|child| child.try_transform(rule))
            .collect::<Result<Vec<_>, E>>()?;
        Ok(self.with_children(rewritten))
    }

    pub fn transform<F>(&self, mut rule: F) -> ExpressionNode
    where
        F: FnMut(&ExpressionNode) -> Option<ExpressionNode>,
    {
        let result: Result<ExpressionNode, Infallible> = self.try_transform(&mut |node: &ExpressionNode| Ok(rule(node)));
        match result {
            Ok(node) => node,
            Err(never) => match never {},
        }
    }

    /// Every reference in the tree, outermost first.
    pub fn references(&self) -> Vec<&Reference> {
        let mut found = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if let ExpressionNode::Reference(reference) = node {
                found.push(reference);
            }
            let children = node.children();
            stack.extend(children.into_iter().rev());
        }
        found
    }

    /// Replaces simple references to the given names, as when a function body
    /// is bound to the argument expressions of a call.
    pub fn substitute(&self, bindings: &HashMap<String, ExpressionNode>) -> ExpressionNode {
        if bindings.is_empty() {
            return self.clone();
        }
        self.transform(|node| match node {
            ExpressionNode::Reference(reference) if reference.is_simple() => bindings.get(&reference.name).cloned(),
            _ => None,
        })
    }

    /// Rewrites `constant(name)` into a plain reference `name` for the given names.
    pub fn replace_constants_by_functions(&self, names: &[String]) -> ExpressionNode {
        self.transform(|node| {
            let name = node.as_reference()?.constant_name()?;
            names
                .iter()
                .any(|n| n == name)
                .then(|| ExpressionNode::reference(name))
        })
    }
}
