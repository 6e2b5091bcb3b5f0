//! Ingestion of ESTree-shaped JSON into the node arena.
//!
//! Host parsers hand programs over as JSON. This module validates the shape
//! against the language subset and appends the nodes to an [`AstArena`].

use serde_json::Value as Json;

use crate::error::{AstError, AstResult};
use crate::node::{
    AssignOp, AstArena, BinaryOp, LitValue, LogicalOp, NodeIx, NodeKind, UnaryOp, UpdateOp,
};

impl AstArena {
    /// Loads one parsed program, returning the index of its `Program` node.
    ///
    /// On error the arena may contain already-appended child nodes; they are
    /// unreachable garbage and harmless, the caller simply discards the load.
    pub fn load_estree(&mut self, json: &Json) -> AstResult<NodeIx> {
        let root = self.load_node(json)?;
        match &self.node(root).kind {
            NodeKind::Program { .. } => Ok(root),
            other => Err(AstError::malformed(format!(
                "top-level node must be Program, got {}",
                other.type_name()
            ))),
        }
    }

    fn load_node(&mut self, json: &Json) -> AstResult<NodeIx> {
        let ty = node_type(json)?;
        let kind = match ty {
            "Program" => NodeKind::Program {
                body: self.load_list(json, ty, "body")?,
            },
            "BlockStatement" => NodeKind::BlockStatement {
                body: self.load_list(json, ty, "body")?,
            },
            "EmptyStatement" => NodeKind::EmptyStatement,
            "ExpressionStatement" => NodeKind::ExpressionStatement {
                expression: self.load_child(json, ty, "expression")?,
            },
            "VariableDeclaration" => NodeKind::VariableDeclaration {
                declarations: self.load_list(json, ty, "declarations")?,
            },
            "VariableDeclarator" => NodeKind::VariableDeclarator {
                id: self.load_child(json, ty, "id")?,
                init: self.load_opt_child(json, "init")?,
            },
            "FunctionDeclaration" => NodeKind::FunctionDeclaration {
                id: self.load_child(json, ty, "id")?,
                params: self.load_list(json, ty, "params")?,
                body: self.load_child(json, ty, "body")?,
            },
            "FunctionExpression" => NodeKind::FunctionExpression {
                id: self.load_opt_child(json, "id")?,
                params: self.load_list(json, ty, "params")?,
                body: self.load_child(json, ty, "body")?,
            },
            "IfStatement" => NodeKind::IfStatement {
                test: self.load_child(json, ty, "test")?,
                consequent: self.load_child(json, ty, "consequent")?,
                alternate: self.load_opt_child(json, "alternate")?,
            },
            "ConditionalExpression" => NodeKind::ConditionalExpression {
                test: self.load_child(json, ty, "test")?,
                consequent: self.load_child(json, ty, "consequent")?,
                alternate: self.load_child(json, ty, "alternate")?,
            },
            "WhileStatement" => NodeKind::WhileStatement {
                test: self.load_child(json, ty, "test")?,
                body: self.load_child(json, ty, "body")?,
            },
            "DoWhileStatement" => NodeKind::DoWhileStatement {
                body: self.load_child(json, ty, "body")?,
                test: self.load_child(json, ty, "test")?,
            },
            "ForStatement" => NodeKind::ForStatement {
                init: self.load_opt_child(json, "init")?,
                test: self.load_opt_child(json, "test")?,
                update: self.load_opt_child(json, "update")?,
                body: self.load_child(json, ty, "body")?,
            },
            "ForInStatement" => NodeKind::ForInStatement {
                left: self.load_child(json, ty, "left")?,
                right: self.load_child(json, ty, "right")?,
                body: self.load_child(json, ty, "body")?,
            },
            "BreakStatement" => NodeKind::BreakStatement {
                label: label_of(json)?,
            },
            "ContinueStatement" => NodeKind::ContinueStatement {
                label: label_of(json)?,
            },
            "ReturnStatement" => NodeKind::ReturnStatement {
                argument: self.load_opt_child(json, "argument")?,
            },
            "ThrowStatement" => NodeKind::ThrowStatement {
                argument: self.load_child(json, ty, "argument")?,
            },
            "TryStatement" => NodeKind::TryStatement {
                block: self.load_child(json, ty, "block")?,
                handler: self.load_opt_child(json, "handler")?,
                finalizer: self.load_opt_child(json, "finalizer")?,
            },
            "CatchClause" => NodeKind::CatchClause {
                param: self.load_child(json, ty, "param")?,
                body: self.load_child(json, ty, "body")?,
            },
            "SwitchStatement" => NodeKind::SwitchStatement {
                discriminant: self.load_child(json, ty, "discriminant")?,
                cases: self.load_list(json, ty, "cases")?,
            },
            "SwitchCase" => NodeKind::SwitchCase {
                test: self.load_opt_child(json, "test")?,
                consequent: self.load_list(json, ty, "consequent")?,
            },
            "LabeledStatement" => NodeKind::LabeledStatement {
                label: identifier_name(field(json, ty, "label")?)?,
                body: self.load_child(json, ty, "body")?,
            },
            "Identifier" => NodeKind::Identifier {
                name: identifier_name(json)?,
            },
            "Literal" => NodeKind::Literal {
                value: literal_value(json)?,
            },
            "ThisExpression" => NodeKind::ThisExpression,
            "ObjectExpression" => NodeKind::ObjectExpression {
                properties: self.load_list(json, ty, "properties")?,
            },
            "Property" => {
                let kind = json.get("kind").and_then(Json::as_str).unwrap_or("init");
                if kind != "init" {
                    return Err(AstError::UnsupportedProperty {
                        kind: kind.to_string(),
                    });
                }
                NodeKind::Property {
                    key: property_key(field(json, ty, "key")?)?,
                    value: self.load_child(json, ty, "value")?,
                }
            }
            "ArrayExpression" => {
                let raw = field(json, ty, "elements")?
                    .as_array()
                    .ok_or_else(|| AstError::missing_field(ty, "elements"))?
                    .clone();
                let mut elements = Vec::with_capacity(raw.len());
                for element in &raw {
                    if element.is_null() {
                        elements.push(None);
                    } else {
                        elements.push(Some(self.load_node(element)?));
                    }
                }
                NodeKind::ArrayExpression { elements }
            }
            "MemberExpression" => NodeKind::MemberExpression {
                object: self.load_child(json, ty, "object")?,
                property: self.load_child(json, ty, "property")?,
                computed: json
                    .get("computed")
                    .and_then(Json::as_bool)
                    .unwrap_or(false),
            },
            "CallExpression" => NodeKind::CallExpression {
                callee: self.load_child(json, ty, "callee")?,
                arguments: self.load_list(json, ty, "arguments")?,
            },
            "NewExpression" => NodeKind::NewExpression {
                callee: self.load_child(json, ty, "callee")?,
                arguments: self.load_list(json, ty, "arguments")?,
            },
            "AssignmentExpression" => NodeKind::AssignmentExpression {
                operator: operator(json, ty, AssignOp::from_token)?,
                left: self.load_child(json, ty, "left")?,
                right: self.load_child(json, ty, "right")?,
            },
            "BinaryExpression" => NodeKind::BinaryExpression {
                operator: operator(json, ty, BinaryOp::from_token)?,
                left: self.load_child(json, ty, "left")?,
                right: self.load_child(json, ty, "right")?,
            },
            "LogicalExpression" => NodeKind::LogicalExpression {
                operator: operator(json, ty, LogicalOp::from_token)?,
                left: self.load_child(json, ty, "left")?,
                right: self.load_child(json, ty, "right")?,
            },
            "UnaryExpression" => NodeKind::UnaryExpression {
                operator: operator(json, ty, UnaryOp::from_token)?,
                argument: self.load_child(json, ty, "argument")?,
            },
            "UpdateExpression" => NodeKind::UpdateExpression {
                operator: operator(json, ty, UpdateOp::from_token)?,
                prefix: json.get("prefix").and_then(Json::as_bool).unwrap_or(false),
                argument: self.load_child(json, ty, "argument")?,
            },
            "SequenceExpression" => NodeKind::SequenceExpression {
                expressions: self.load_list(json, ty, "expressions")?,
            },
            other => {
                return Err(AstError::UnsupportedNode {
                    node_type: other.to_string(),
                })
            }
        };
        Ok(self.push(kind))
    }

    fn load_child(&mut self, json: &Json, ty: &str, name: &'static str) -> AstResult<NodeIx> {
        self.load_node(field(json, ty, name)?)
    }

    fn load_opt_child(&mut self, json: &Json, name: &str) -> AstResult<Option<NodeIx>> {
        match json.get(name) {
            None | Some(Json::Null) => Ok(None),
            Some(child) => Ok(Some(self.load_node(child)?)),
        }
    }

    fn load_list(&mut self, json: &Json, ty: &str, name: &'static str) -> AstResult<Vec<NodeIx>> {
        let items = field(json, ty, name)?
            .as_array()
            .ok_or_else(|| AstError::missing_field(ty, name))?
            .clone();
        let mut out = Vec::with_capacity(items.len());
        for item in &items {
            out.push(self.load_node(item)?);
        }
        Ok(out)
    }
}

fn node_type(json: &Json) -> AstResult<&str> {
    json.get("type")
        .and_then(Json::as_str)
        .ok_or_else(|| AstError::malformed("node is not an object with a string `type`"))
}

fn field<'a>(json: &'a Json, ty: &str, name: &'static str) -> AstResult<&'a Json> {
    match json.get(name) {
        Some(value) if !value.is_null() => Ok(value),
        _ => Err(AstError::missing_field(ty, name)),
    }
}

fn identifier_name(json: &Json) -> AstResult<String> {
    if node_type(json)? != "Identifier" {
        return Err(AstError::malformed("expected an Identifier node"));
    }
    json.get("name")
        .and_then(Json::as_str)
        .map(str::to_string)
        .ok_or_else(|| AstError::missing_field("Identifier", "name"))
}

fn label_of(json: &Json) -> AstResult<Option<String>> {
    match json.get("label") {
        None | Some(Json::Null) => Ok(None),
        Some(label) => Ok(Some(identifier_name(label)?)),
    }
}

fn operator<T>(json: &Json, ty: &str, parse: impl Fn(&str) -> Option<T>) -> AstResult<T> {
    let token = json
        .get("operator")
        .and_then(Json::as_str)
        .ok_or_else(|| AstError::missing_field(ty, "operator"))?;
    parse(token).ok_or_else(|| AstError::unknown_operator(token))
}

/// Canonicalizes an object-literal key to its property-name string.
fn property_key(json: &Json) -> AstResult<String> {
    match node_type(json)? {
        "Identifier" => identifier_name(json),
        "Literal" => match json.get("value") {
            Some(Json::String(s)) => Ok(s.clone()),
            Some(Json::Number(n)) => Ok(number_key(n.as_f64().unwrap_or(f64::NAN))),
            _ => Err(AstError::malformed("property key literal must be string or number")),
        },
        other => Err(AstError::malformed(format!(
            "unsupported property key node: {other}"
        ))),
    }
}

// Property names are always strings; numeric keys use their decimal form.
fn number_key(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn literal_value(json: &Json) -> AstResult<LitValue> {
    if let Some(regex) = json.get("regex") {
        let pattern = regex
            .get("pattern")
            .and_then(Json::as_str)
            .ok_or_else(|| AstError::missing_field("Literal", "regex"))?;
        let flags = regex.get("flags").and_then(Json::as_str).unwrap_or("");
        return Ok(LitValue::Regex {
            pattern: pattern.to_string(),
            flags: flags.to_string(),
        });
    }
    match json.get("value") {
        None | Some(Json::Null) => Ok(LitValue::Null),
        Some(Json::Bool(b)) => Ok(LitValue::Bool(*b)),
        Some(Json::Number(n)) => Ok(LitValue::Num(n.as_f64().unwrap_or(f64::NAN))),
        Some(Json::String(s)) => Ok(LitValue::Str(s.clone())),
        Some(other) => Err(AstError::malformed(format!(
            "unsupported literal payload: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loads_expression_statement() {
        let mut arena = AstArena::new();
        let program = json!({
            "type": "Program",
            "body": [{
                "type": "ExpressionStatement",
                "expression": {
                    "type": "BinaryExpression",
                    "operator": "+",
                    "left": {"type": "Literal", "value": 1},
                    "right": {"type": "Literal", "value": 2}
                }
            }]
        });
        let root = arena.load_estree(&program).expect("loads");
        let NodeKind::Program { body } = &arena.node(root).kind else {
            panic!("root must be Program");
        };
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn rejects_unknown_node_type() {
        let mut arena = AstArena::new();
        let err = arena
            .load_estree(&json!({"type": "Program", "body": [{"type": "YieldExpression"}]}))
            .unwrap_err();
        assert_eq!(
            err,
            AstError::UnsupportedNode {
                node_type: "YieldExpression".to_string()
            }
        );
    }

    #[test]
    fn rejects_non_program_root() {
        let mut arena = AstArena::new();
        let err = arena.load_estree(&json!({"type": "EmptyStatement"})).unwrap_err();
        assert!(matches!(err, AstError::Malformed { .. }));
    }

    #[test]
    fn canonicalizes_property_keys() {
        let mut arena = AstArena::new();
        let program = json!({
            "type": "Program",
            "body": [{
                "type": "ExpressionStatement",
                "expression": {
                    "type": "ObjectExpression",
                    "properties": [
                        {
                            "type": "Property",
                            "kind": "init",
                            "key": {"type": "Literal", "value": 7},
                            "value": {"type": "Literal", "value": "seven"}
                        }
                    ]
                }
            }]
        });
        let root = arena.load_estree(&program).expect("loads");
        let keys: Vec<String> = (0..arena.len())
            .filter_map(|i| match &arena.node(NodeIx(i as u32)).kind {
                NodeKind::Property { key, .. } => Some(key.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(keys, vec!["7".to_string()]);
        let _ = root;
    }

    #[test]
    fn loads_regex_literal() {
        let mut arena = AstArena::new();
        let program = json!({
            "type": "Program",
            "body": [{
                "type": "ExpressionStatement",
                "expression": {
                    "type": "Literal",
                    "regex": {"pattern": "a+b", "flags": "gi"}
                }
            }]
        });
        arena.load_estree(&program).expect("loads");
        let found = (0..arena.len()).any(|i| {
            matches!(
                &arena.node(NodeIx(i as u32)).kind,
                NodeKind::Literal {
                    value: LitValue::Regex { pattern, flags }
                } if pattern == "a+b" && flags == "gi"
            )
        });
        assert!(found);
    }

    #[test]
    fn break_with_label() {
        let mut arena = AstArena::new();
        let program = json!({
            "type": "Program",
            "body": [{
                "type": "LabeledStatement",
                "label": {"type": "Identifier", "name": "outer"},
                "body": {
                    "type": "WhileStatement",
                    "test": {"type": "Literal", "value": true},
                    "body": {
                        "type": "BreakStatement",
                        "label": {"type": "Identifier", "name": "outer"}
                    }
                }
            }]
        });
        arena.load_estree(&program).expect("loads");
        let found = (0..arena.len()).any(|i| {
            matches!(
                &arena.node(NodeIx(i as u32)).kind,
                NodeKind::BreakStatement { label: Some(l) } if l == "outer"
            )
        });
        assert!(found);
    }
}
