use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::opcode::Opcode;
use crate::value::{Rgb, Value};

/// A value-producing input slot. Immutable once compiled.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Color(Rgb),
    /// Looked up by name through the running target's scope on every evaluation.
    Variable(String),
    /// A nested chain (reporter, boolean, menu or C-block body); yields its last result.
    Script(Arc<Script>),
}

/// One compiled step: an opcode plus its named arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub id: String,
    pub opcode: Opcode,
    /// The opcode name as written in the project, kept for diagnostics.
    pub name: String,
    pub args: BTreeMap<String, Expr>,
}

impl Block {
    pub fn arg(&self, name: &str) -> Option<&Expr> {
        self.args.get(name)
    }
}

/// An ordered chain of blocks compiled from one origin node.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Script {
    origin: String,
    blocks: Vec<Block>,
}

impl Script {
    pub fn new(origin: impl Into<String>, blocks: Vec<Block>) -> Self {
        Self {
            origin: origin.into(),
            blocks,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        for block in &self.blocks {
            writeln!(f, "{pad}Block({})", block.name)?;
            for (name, expr) in &block.args {
                match expr {
                    Expr::Script(nested) => {
                        writeln!(f, "{pad}  {name}:")?;
                        nested.write_indented(f, depth + 2)?;
                    }
                    Expr::Literal(value) => writeln!(f, "{pad}  {name} = {value:?}")?,
                    Expr::Color(rgb) => writeln!(f, "{pad}  {name} = {rgb}")?,
                    Expr::Variable(var) => writeln!(f, "{pad}  {name} = var({var})")?,
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}
