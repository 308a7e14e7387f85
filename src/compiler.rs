use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{HatchError, HatchResult};
use crate::hat::Hat;
use crate::opcode::Opcode;
use crate::project::{json_text, BlockEntry, BlockRecord, TargetJson};
use crate::scope::Scope;
use crate::script::{Block, Expr, Script};
use crate::value::{Rgb, Value};

const TAG_MATH_NUMBER: u64 = 4;
const TAG_POSITIVE_NUMBER: u64 = 5;
const TAG_WHOLE_NUMBER: u64 = 6;
const TAG_INTEGER: u64 = 7;
const TAG_ANGLE: u64 = 8;
const TAG_COLOR: u64 = 9;
const TAG_TEXT: u64 = 10;
const TAG_BROADCAST: u64 = 11;
const TAG_VARIABLE: u64 = 12;
const TAG_LIST: u64 = 13;

/// Materializes a target's declared variables, overlaid on `shared` when given.
pub fn build_scope(target: &TargetJson, shared: Option<Arc<Scope>>) -> HatchResult<Scope> {
    let mut scope = Scope::new(shared);
    for (name, initial) in target.variable_entries()? {
        scope.declare(name, Value::from_json(&initial));
    }
    Ok(scope)
}

/// Walks one target's block table. Variable references are checked against
/// `scope` at compile time and looked up again by name at run time.
pub struct Compiler<'a> {
    blocks: &'a BTreeMap<String, BlockEntry>,
    scope: &'a Scope,
}

impl<'a> Compiler<'a> {
    pub fn new(target: &'a TargetJson, scope: &'a Scope) -> Self {
        Self {
            blocks: &target.blocks,
            scope,
        }
    }

    /// Every top-level event block with a supported trigger, paired with the
    /// script hanging below it.
    pub fn hats(&self) -> HatchResult<Vec<(Arc<Script>, Hat)>> {
        let mut out = Vec::new();
        for (id, entry) in self.blocks {
            let BlockEntry::Block(record) = entry else {
                continue;
            };
            if !record.top_level || !record.opcode.starts_with("event_") {
                continue;
            }
            match Hat::from_event_block(id, record)? {
                Some(hat) => {
                    let script = self.compile_chain(id, record.next.as_deref())?;
                    out.push((Arc::new(script), hat));
                }
                None => debug!("[Hatch compiler] Ignoring top-level '{}' ({id})", record.opcode),
            }
        }
        Ok(out)
    }

    /// Compiles the chain that starts at `start`, following `next` pointers.
    pub fn compile_chain(&self, origin: &str, start: Option<&str>) -> HatchResult<Script> {
        let mut path = Vec::new();
        self.chain(origin, start, &mut path)
    }

    /// `path` holds every block id on the current compile path, so both a
    /// looping `next` chain and an input that refers back to an enclosing
    /// block are reported as cycles.
    fn chain(&self, origin: &str, start: Option<&str>, path: &mut Vec<String>) -> HatchResult<Script> {
        let depth = path.len();
        let mut blocks = Vec::new();
        let mut cursor = start.map(str::to_string);
        while let Some(id) = cursor {
            if path.iter().any(|seen| *seen == id) {
                return Err(HatchError::ScriptCycle(id));
            }
            let record = self.record(&id)?;
            path.push(id.clone());
            blocks.push(self.block(&id, record, path)?);
            cursor = record.next.clone();
        }
        path.truncate(depth);
        Ok(Script::new(origin, blocks))
    }

    fn record(&self, id: &str) -> HatchResult<&'a BlockRecord> {
        match self.blocks.get(id) {
            Some(BlockEntry::Block(record)) => Ok(record),
            Some(BlockEntry::Primitive(_)) => Err(HatchError::invalid_block(
                id,
                "primitive entry used as a block",
            )),
            None => Err(HatchError::MissingBlock(id.to_string())),
        }
    }

    fn block(&self, id: &str, record: &BlockRecord, path: &mut Vec<String>) -> HatchResult<Block> {
        let mut args = BTreeMap::new();
        for name in record.fields.keys() {
            let text = record.field_text(name).unwrap_or_default();
            if name == "VARIABLE" && record.opcode.starts_with("data_") {
                self.scope.resolve(&text)?;
            }
            args.insert(name.to_lowercase(), Expr::Literal(Value::Text(text)));
        }
        for (name, input) in &record.inputs {
            if let Some(expr) = self.input(id, name, input, path)? {
                args.insert(name.to_lowercase(), expr);
            }
        }
        Ok(Block {
            id: id.to_string(),
            opcode: Opcode::from_name(&record.opcode),
            name: record.opcode.clone(),
            args,
        })
    }

    /// Inputs are `[shadow kind, value, (obscured shadow)]`; the value is either
    /// a block id (nested script), a typed `[tag, ...]` literal, or null.
    fn input(
        &self,
        id: &str,
        name: &str,
        input: &serde_json::Value,
        path: &mut Vec<String>,
    ) -> HatchResult<Option<Expr>> {
        let value = match input {
            serde_json::Value::Array(items) => items.get(1),
            _ => {
                return Err(HatchError::invalid_block(
                    id,
                    format!("input {name} is not an array"),
                ))
            }
        };
        match value {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(nested)) => {
                let script = self.chain(nested, Some(nested), path)?;
                Ok(Some(Expr::Script(Arc::new(script))))
            }
            Some(serde_json::Value::Array(typed)) => self.typed(id, typed).map(Some),
            Some(other) => Err(HatchError::invalid_block(
                id,
                format!("input {name} has unexpected value {other}"),
            )),
        }
    }

    fn typed(&self, id: &str, typed: &[serde_json::Value]) -> HatchResult<Expr> {
        let tag = typed
            .first()
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| HatchError::invalid_block(id, "typed input without a numeric tag"))?;
        let raw = typed.get(1).map(json_text).unwrap_or_default();
        match tag {
            TAG_MATH_NUMBER | TAG_POSITIVE_NUMBER => literal_number(id, &raw, false),
            TAG_WHOLE_NUMBER | TAG_INTEGER | TAG_ANGLE => literal_number(id, &raw, true),
            TAG_COLOR => Rgb::parse(&raw)
                .map(Expr::Color)
                .ok_or_else(|| HatchError::invalid_block(id, format!("bad color '{raw}'"))),
            TAG_TEXT | TAG_BROADCAST | TAG_LIST => Ok(Expr::Literal(Value::Text(raw))),
            TAG_VARIABLE => {
                self.scope.resolve(&raw)?;
                Ok(Expr::Variable(raw))
            }
            other => Err(HatchError::invalid_block(
                id,
                format!("unknown data type {other}"),
            )),
        }
    }
}

/// Empty numeric slots read as zero; anything else must parse.
fn literal_number(id: &str, raw: &str, integer: bool) -> HatchResult<Expr> {
    let text = raw.trim();
    if text.is_empty() {
        return Ok(Expr::Literal(if integer {
            Value::Int(0)
        } else {
            Value::Number(0.0)
        }));
    }
    if integer {
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Expr::Literal(Value::Int(i)));
        }
    }
    text.parse::<f64>()
        .map(|n| Expr::Literal(Value::Number(n)))
        .map_err(|_| HatchError::invalid_block(id, format!("'{raw}' is not a number")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(blocks: serde_json::Value) -> TargetJson {
        serde_json::from_value(serde_json::json!({
            "isStage": false,
            "name": "Cat",
            "variables": { "v1": ["x", 0] },
            "blocks": blocks
        }))
        .expect("parse target")
    }

    fn compile(target: &TargetJson) -> HatchResult<Vec<(Arc<Script>, Hat)>> {
        let scope = build_scope(target, None)?;
        Compiler::new(target, &scope).hats()
    }

    fn flag_script() -> serde_json::Value {
        serde_json::json!({
            "hat": { "opcode": "event_whenflagclicked", "next": "set", "topLevel": true },
            "set": {
                "opcode": "data_setvariableto",
                "next": "move",
                "fields": { "VARIABLE": ["x", "v1"] },
                "inputs": { "VALUE": [1, [10, "5"]] }
            },
            "move": {
                "opcode": "motion_movesteps",
                "next": "ifb",
                "inputs": { "STEPS": [1, [4, "10"]] }
            },
            "ifb": {
                "opcode": "control_if",
                "next": null,
                "inputs": {
                    "CONDITION": [2, "cond"],
                    "SUBSTACK": [2, "say"]
                }
            },
            "cond": {
                "opcode": "operator_gt",
                "inputs": {
                    "OPERAND1": [3, [12, "x", "v1"], [10, ""]],
                    "OPERAND2": [1, [10, "3"]]
                }
            },
            "say": {
                "opcode": "looks_say",
                "inputs": { "MESSAGE": [1, [9, "#ff0000"]] }
            },
            "stray": { "opcode": "motion_turnright", "topLevel": true },
            "loose": [12, "x", "v1", 1, 1]
        })
    }

    #[test]
    fn compiles_flag_script_with_nested_reporters() {
        let target = target(flag_script());
        let hats = compile(&target).expect("compile");
        assert_eq!(hats.len(), 1);
        let (script, hat) = &hats[0];
        assert_eq!(*hat, Hat::ProgramStart);
        assert_eq!(script.origin(), "hat");

        let ops: Vec<_> = script.blocks().iter().map(|b| b.opcode).collect();
        assert_eq!(ops, vec![Opcode::SetVariableTo, Opcode::MoveSteps, Opcode::If]);

        let set = &script.blocks()[0];
        assert_eq!(set.arg("variable"), Some(&Expr::Literal(Value::text("x"))));
        assert_eq!(set.arg("value"), Some(&Expr::Literal(Value::text("5"))));
        assert_eq!(
            script.blocks()[1].arg("steps"),
            Some(&Expr::Literal(Value::Number(10.0)))
        );

        let Some(Expr::Script(cond)) = script.blocks()[2].arg("condition") else {
            panic!("condition should be a nested script");
        };
        assert_eq!(cond.blocks()[0].opcode, Opcode::Gt);
        assert_eq!(
            cond.blocks()[0].arg("operand1"),
            Some(&Expr::Variable("x".into()))
        );
        let Some(Expr::Script(body)) = script.blocks()[2].arg("substack") else {
            panic!("substack should be a nested script");
        };
        assert_eq!(
            body.blocks()[0].arg("message"),
            Some(&Expr::Color(Rgb { red: 255, green: 0, blue: 0 }))
        );
    }

    #[test]
    fn compiling_twice_is_identical() {
        let target = target(flag_script());
        let first = compile(&target).expect("first");
        let second = compile(&target).expect("second");
        assert_eq!(first.len(), second.len());
        for ((a, _), (b, _)) in first.iter().zip(second.iter()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn unknown_type_tag_is_invalid_block_data() {
        let target = target(serde_json::json!({
            "hat": { "opcode": "event_whenflagclicked", "next": "say", "topLevel": true },
            "say": { "opcode": "looks_say", "inputs": { "MESSAGE": [1, [99, "?"]] } }
        }));
        let err = compile(&target).expect_err("should fail");
        assert!(matches!(err, HatchError::InvalidBlockData { ref block, .. } if block == "say"));
        assert!(err.to_string().contains("unknown data type 99"));
    }

    #[test]
    fn unresolvable_variable_fails_compile() {
        let target = target(serde_json::json!({
            "hat": { "opcode": "event_whenflagclicked", "next": "say", "topLevel": true },
            "say": { "opcode": "looks_say", "inputs": { "MESSAGE": [3, [12, "nope", "n"], [10, ""]] } }
        }));
        assert!(matches!(
            compile(&target),
            Err(HatchError::UnknownVariable(name)) if name == "nope"
        ));
    }

    #[test]
    fn next_cycle_is_fatal() {
        let target = target(serde_json::json!({
            "hat": { "opcode": "event_whenflagclicked", "next": "a", "topLevel": true },
            "a": { "opcode": "looks_nextcostume", "next": "b" },
            "b": { "opcode": "looks_nextcostume", "next": "a" }
        }));
        assert!(matches!(compile(&target), Err(HatchError::ScriptCycle(id)) if id == "a"));
    }

    #[test]
    fn nested_back_reference_is_fatal() {
        let target = target(serde_json::json!({
            "hat": { "opcode": "event_whenflagclicked", "next": "loop", "topLevel": true },
            "loop": { "opcode": "control_forever", "inputs": { "SUBSTACK": [2, "loop"] } }
        }));
        assert!(matches!(compile(&target), Err(HatchError::ScriptCycle(_))));
    }

    #[test]
    fn missing_next_target_is_reported() {
        let target = target(serde_json::json!({
            "hat": { "opcode": "event_whenflagclicked", "next": "gone", "topLevel": true }
        }));
        assert!(matches!(compile(&target), Err(HatchError::MissingBlock(id)) if id == "gone"));
    }

    #[test]
    fn shared_substack_is_compiled_per_reference() {
        let target = target(serde_json::json!({
            "hat": { "opcode": "event_whenflagclicked", "next": "a", "topLevel": true },
            "a": { "opcode": "control_if", "next": "b", "inputs": { "SUBSTACK": [2, "leaf"] } },
            "b": { "opcode": "control_if", "inputs": { "SUBSTACK": [2, "leaf"] } },
            "leaf": { "opcode": "looks_nextcostume" }
        }));
        let hats = compile(&target).expect("diamond references are not cycles");
        assert_eq!(hats[0].0.len(), 2);
    }

    #[test]
    fn integer_tags_produce_integers() {
        let target = target(serde_json::json!({
            "hat": { "opcode": "event_whenflagclicked", "next": "r", "topLevel": true },
            "r": {
                "opcode": "control_repeat",
                "inputs": { "TIMES": [1, [6, "10"]] }
            }
        }));
        let hats = compile(&target).expect("compile");
        assert_eq!(
            hats[0].0.blocks()[0].arg("times"),
            Some(&Expr::Literal(Value::Int(10)))
        );
    }

    #[test]
    fn key_hats_and_broadcast_hats_are_discovered() {
        let target = target(serde_json::json!({
            "k": {
                "opcode": "event_whenkeypressed",
                "fields": { "KEY_OPTION": ["space", null] },
                "topLevel": true
            },
            "m": {
                "opcode": "event_whenbroadcastreceived",
                "fields": { "BROADCAST_OPTION": ["go", "id1"] },
                "topLevel": true
            }
        }));
        let hats: Vec<_> = compile(&target)
            .expect("compile")
            .into_iter()
            .map(|(script, hat)| {
                assert!(script.is_empty());
                hat
            })
            .collect();
        assert_eq!(
            hats,
            vec![
                Hat::key_pressed("space").expect("space"),
                Hat::MessageReceived("go".into())
            ]
        );
    }
}
