use crate::core::expression::{ArithmeticOperator, ExpressionNode, Lambda};
use crate::core::profile::RankProfile;
use crate::core::tensor::{Aggregator, Dimension, TensorType};
use std::collections::BTreeMap;
use tracing::debug;

/// Wraps each use of a required input, directly or through a single
/// rename, in a sum over its size-1 dimensions.
pub fn reduce_batch_dimensions_at_input(
    node: &ExpressionNode,
    required_inputs: &BTreeMap<String, TensorType>,
    profile: &RankProfile,
) -> ExpressionNode {
    node.transform(|node| {
        if is_input_site(node, required_inputs) {
            Some(reduce_batch_dimensions(node, profile))
        } else {
            None
        }
    })
}

fn is_input_site(node: &ExpressionNode, required_inputs: &BTreeMap<String, TensorType>) -> bool {
    let target = match node {
        ExpressionNode::Rename { argument, .. } => argument.as_ref(),
        other => other,
    };
    match target.as_reference() {
        Some(reference) => reference.is_simple() && required_inputs.contains_key(&reference.name),
        None => false,
    }
}

fn reduce_batch_dimensions(node: &ExpressionNode, profile: &RankProfile) -> ExpressionNode {
    let ty = match profile.inferred_type(node) {
        Some(ty) if ty.rank() > 1 => ty,
        _ => return node.clone(),
    };
    let dimensions: Vec<String> = ty
        .dimensions()
        .iter()
        .filter(|d| d.size() == Some(1))
        .map(|d| d.name().to_string())
        .collect();
    if dimensions.is_empty() {
        return node.clone();
    }
    debug!(input = %node, dimensions = ?dimensions, "reducing batch dimensions");
    ExpressionNode::reduce(node.clone(), Aggregator::Sum, dimensions)
}

/// Multiplies the expression by a tensor of ones over the size-1
/// dimensions of `before` that are missing from `after`.
pub fn expand_batch_dimensions_at_output(
    node: ExpressionNode,
    before: &TensorType,
    after: &TensorType,
) -> ExpressionNode {
    if before == after {
        return node;
    }
    let missing: Vec<Dimension> = before
        .dimensions()
        .iter()
        .filter(|d| d.size() == Some(1) && after.dimension(d.name()).is_none())
        .cloned()
        .collect();
    if missing.is_empty() {
        return node;
    }
    let ones = missing
        .into_iter()
        .fold(TensorType::builder(), |builder, d| builder.dimension(d))
        .build();
    let ty = match ones {
        Ok(ty) => ty,
        Err(_) => return node,
    };
    let multiply = ExpressionNode::arithmetic(
        ArithmeticOperator::Multiply,
        ExpressionNode::reference("a"),
        ExpressionNode::reference("b"),
    );
    ExpressionNode::Join {
        left: Box::new(node),
        right: Box::new(ExpressionNode::Generate {
            ty,
            body: Box::new(ExpressionNode::Constant(1.0)),
        }),
        lambda: Lambda::new(&["a", "b"], multiply),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(spec: &str) -> TensorType {
        TensorType::from_spec(spec).unwrap()
    }

    fn parse(text: &str) -> ExpressionNode {
        ExpressionNode::parse(text).unwrap()
    }

    fn profile() -> RankProfile {
        let mut profile = RankProfile::new("test");
        profile.declare_input("query(x)", t("tensor(d0[1],d1[10])"));
        profile.add_function("input", vec![], parse("query(x)")).unwrap();
        profile
    }

    fn required() -> BTreeMap<String, TensorType> {
        BTreeMap::from([("input".to_string(), t("tensor(d0[1],d1[10])"))])
    }

    #[test]
    fn test_reduces_direct_and_renamed_inputs() {
        let profile = profile();
        let reduced = reduce_batch_dimensions_at_input(&parse("input * 2"), &required(), &profile);
        assert_eq!(reduced.to_string(), "reduce(input, sum, d0) * 2.0");

        let renamed = parse("rename(input, d1, d2)");
        let reduced = reduce_batch_dimensions_at_input(&renamed, &required(), &profile);
        assert_eq!(reduced.to_string(), "reduce(rename(input, d1, d2), sum, d0)");
    }

    #[test]
    fn test_leaves_other_references_alone() {
        let profile = profile();
        let node = parse("other + query(x)");
        assert_eq!(reduce_batch_dimensions_at_input(&node, &required(), &profile), node);
    }

    #[test]
    fn test_expand_restores_missing_dimensions() {
        let node = parse("x");
        let expanded = expand_batch_dimensions_at_output(node.clone(), &t("tensor(d0[1],d2[5])"), &t("tensor(d2[5])"));
        assert_eq!(expanded.to_string(), "join(x, tensor(d0[1])(1.0), f(a,b)(a * b))");
        let same = expand_batch_dimensions_at_output(node.clone(), &t("tensor(d2[5])"), &t("tensor(d2[5])"));
        assert_eq!(same, node);
    }
}
