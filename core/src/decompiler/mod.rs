//! Reconstructs script source from a compiled program.
//!
//! Decompilation runs in stages:
//!
//! 1. NOPs and unreachable code are stripped and the program is split into
//!    subroutines at `JSR` targets ([`layout::Partition`]).
//! 2. A stack walk over each subroutine gives the depth before every
//!    instruction and the sizes of its parameters and return value.
//! 3. Each subroutine is executed symbolically. Stack slots become
//!    variables, computed values become expressions, and jumps are matched
//!    against the shapes the compiler emits for loops and conditionals.
//! 4. Variable slots used together are widened into vectors and structs.
//! 5. The trees are printed as source text.
//!
//! A subroutine that does not fit is reported as a [`SubroutineAmbiguity`]
//! and printed as its raw disassembly inside a comment. The other
//! subroutines are unaffected.

mod layout;
mod nodes;
mod structure;
mod symbolic;
mod unparse;
mod vars;


use core::fmt::Write;
use core::ops::Range;

use hashbrown::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::decompiler::layout::{Interface, Layout, Partition};
use crate::decompiler::nodes::Expr;
use crate::decompiler::symbolic::{Analysis, Builder, Built, Inputs};
use crate::decompiler::unparse::{Printer, Symbols};
use crate::decompiler::vars::Structs;
use crate::optimizer::{OptimizerPass, RemoveNops, RemoveUnreachable, RemoveZeroMoves, optimize};
use crate::types::{DataType, Game};
use crate::vm::{Opcode, Program, TypeQualifier, disasm::disassemble};

/// Why a subroutine could not be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmbiguityKind {
    #[error("unknown engine routine {0}")]
    UnknownRoutine(u16),

    #[error("stack depth differs between paths at instruction {0}")]
    InconsistentDepth(usize),

    #[error("recursive call")]
    Recursion,

    #[error("jump at instruction {0} leaves the subroutine")]
    EscapingJump(usize),

    #[error("jump at instruction {0} does not match any control structure")]
    UnstructuredJump(usize),

    #[error("unexpected stack contents at instruction {0}")]
    StackShape(usize),

    #[error("{opcode} at instruction {index} is not supported")]
    Unsupported { opcode: &'static str, index: usize },

    #[error("cannot be written as source: {0}")]
    Unprintable(String),

    #[error("program does not start with an entry stub")]
    EntryStub,
}

/// A subroutine the decompiler gave up on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("subroutine at {entry}: {kind}")]
pub struct SubroutineAmbiguity {
    /// Index of the subroutine's first instruction.
    pub entry: usize,
    pub kind: AmbiguityKind,
}

/// What was inferred about one subroutine's interface.
#[derive(Debug, Clone, PartialEq)]
pub struct SubroutineDescriptor {
    pub name: String,
    /// Index of the first instruction, after stripping.
    pub entry: usize,
    /// One past the last instruction.
    pub end: usize,
    pub ret: DataType,
    pub params: Vec<DataType>,
}

/// The result of decompiling one program.
#[derive(Debug)]
pub struct Decompiler {
    subroutines: Vec<SubroutineDescriptor>,
    ambiguities: Vec<SubroutineAmbiguity>,
    source: String,
}

/// Decompiles `program` against the routine table of `game`.
pub fn decompile(program: &Program, game: Game) -> String {
    Decompiler::new(program, game).into_source()
}

impl Decompiler {
    pub fn new(program: &Program, game: Game) -> Self {
        let strip: [Box<dyn OptimizerPass>; 3] = [
            Box::new(RemoveNops),
            Box::new(RemoveZeroMoves),
            Box::new(RemoveUnreachable),
        ];
        let program = optimize(program.clone(), &strip);
        let listing: Vec<String> = disassemble(&program, false)
            .lines()
            .map(str::to_string)
            .collect();

        let Some(stub) = EntryStub::find(&program) else {
            let kind = AmbiguityKind::EntryStub;
            warn!(entry = 0, %kind, "Subroutine ambiguity");
            let mut source = String::new();
            failure_stub(&mut source, &kind, &listing, 0..program.len());
            return Self {
                subroutines: Vec::new(),
                ambiguities: vec![SubroutineAmbiguity { entry: 0, kind }],
                source,
            };
        };

        let dialect = game.dialect();
        let partition = Partition::new(&program);
        debug!(subroutines = partition.len(), ranges = ?partition.ranges, "Partitioned program");
        let layouts = layout::analyze(&program, dialect, &partition);
        let inputs = Inputs {
            program: &program,
            dialect,
            partition: &partition,
            layouts: &layouts,
        };
        Session::new(&inputs, stub, &listing).run()
    }

    /// Interfaces of every user subroutine, in address order.
    pub fn subroutines(&self) -> &[SubroutineDescriptor] {
        &self.subroutines
    }

    pub fn ambiguities(&self) -> &[SubroutineAmbiguity] {
        &self.ambiguities
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn into_source(self) -> String {
        self.source
    }
}

/// How the program enters its entry point.
#[derive(Debug, Clone, Copy)]
struct EntryStub {
    /// The stub reserves an `int` result.
    conditional: bool,
    /// Target of the stub's call.
    callee: usize,
}

impl EntryStub {
    /// Matches `[RSADDI] JSR <callee>; RETN` at instruction 0.
    fn find(program: &Program) -> Option<Self> {
        let instructions = program.instructions();
        let conditional = matches!(
            instructions.first(),
            Some(first) if first.opcode == Opcode::RsAdd && first.qualifier == TypeQualifier::INT
        );
        let at = usize::from(conditional);
        let call = instructions.get(at)?;
        if call.opcode != Opcode::Jsr || instructions.get(at + 1)?.opcode != Opcode::Retn {
            return None;
        }
        let callee = program.jump_target_of(call)?;
        Some(Self {
            conditional,
            callee,
        })
    }
}

/// The globals routine, when the program has one.
struct GlobalsRoutine {
    sub: usize,
    savebp: usize,
    /// Bytes of globals below the saved BP.
    size: i32,
}

/// State of one decompilation.
struct Session<'a> {
    inputs: &'a Inputs<'a>,
    stub: EntryStub,
    listing: &'a [String],
    analysis: Analysis,
    structs: Structs,
    ambiguities: Vec<SubroutineAmbiguity>,
}

impl<'a> Session<'a> {
    fn new(inputs: &'a Inputs<'a>, stub: EntryStub, listing: &'a [String]) -> Self {
        let count = inputs.partition.len();
        let analysis = Analysis {
            params: vec![Vec::new(); count],
            ret_slots: vec![Vec::new(); count],
            returns: vec![None; count],
            ..Analysis::default()
        };
        Self {
            inputs,
            stub,
            listing,
            analysis,
            structs: Structs::default(),
            ambiguities: Vec::new(),
        }
    }

    fn range(&self, sub: usize) -> Range<usize> {
        self.inputs.partition.ranges[sub].clone()
    }

    fn layout(&self, sub: usize) -> Option<&'a Layout> {
        self.inputs.layouts.results[sub].as_ref().ok()
    }

    fn interface(&self, sub: usize) -> Option<Interface> {
        self.inputs.layouts.interfaces[sub]
    }

    fn fail(&mut self, sub: usize, kind: AmbiguityKind) -> AmbiguityKind {
        let entry = self.range(sub).start;
        warn!(entry, %kind, "Subroutine ambiguity");
        self.ambiguities.push(SubroutineAmbiguity {
            entry,
            kind: kind.clone(),
        });
        kind
    }

    /// The globals routine is the stub's callee when it executes `SAVEBP`.
    fn globals_routine(&self, callee: usize) -> Option<(GlobalsRoutine, usize)> {
        let sub = self.inputs.partition.index_of(callee)?;
        let range = self.range(sub);
        let instructions = self.inputs.program.instructions();
        let savebp = range
            .clone()
            .find(|&i| instructions[i].opcode == Opcode::SaveBp)?;
        let size = self.layout(sub)?.depth_at(range.start, savebp)?;
        let entry = (savebp + 1..range.end)
            .find(|&i| instructions[i].opcode == Opcode::Jsr)
            .and_then(|i| self.inputs.program.jump_target_of(&instructions[i]))?;
        Some((GlobalsRoutine { sub, savebp, size }, entry))
    }

    fn run(mut self) -> Decompiler {
        let partition = self.inputs.partition;
        let (globals, entry) = match self.globals_routine(self.stub.callee) {
            Some((globals, entry)) => (Some(globals), entry),
            None => (None, self.stub.callee),
        };
        let entry_sub = partition.index_of(entry);
        let globals_size = globals.as_ref().map_or(0, |g| g.size);

        for _ in 0..globals_size / 4 {
            let var = self.analysis.vars.add(DataType::Unknown);
            self.analysis.globals.push(var);
        }
        // Subroutines in address order, without the stub and globals routine.
        let subs: Vec<usize> = (1..partition.len())
            .filter(|sub| globals.as_ref().is_none_or(|g| g.sub != *sub))
            .collect();
        for &sub in &subs {
            let Some(interface) = self.interface(sub) else {
                continue;
            };
            let params = (0..interface.params / 4)
                .map(|_| self.analysis.vars.add(DataType::Unknown))
                .collect();
            self.analysis.params[sub] = params;
        }

        let globals_tree = globals.as_ref().map(|g| self.build_globals(g));
        let mut built: HashMap<usize, Result<Built, AmbiguityKind>> = HashMap::new();
        for &sub in &subs {
            let result = self.build(sub, globals_size);
            built.insert(sub, result);
        }

        let symbols = self.symbols(&subs, entry_sub);
        let mut subroutines = Vec::with_capacity(subs.len());
        for &sub in &subs {
            let range = self.range(sub);
            let params = symbols.params[sub]
                .iter()
                .map(|&(start, _)| self.analysis.vars.group_type(start, &mut self.structs))
                .collect();
            subroutines.push(SubroutineDescriptor {
                name: symbols.sub_names[sub].clone(),
                entry: range.start,
                end: range.end,
                ret: symbols.returns[sub].clone(),
                params,
            });
        }

        // Globals, prototypes and bodies first; struct definitions are only
        // known once everything else has been printed.
        let globals_text = match (&globals, globals_tree) {
            (Some(g), Some(Ok(tree))) => match self.print_globals(&tree, &symbols) {
                Ok(text) => text,
                Err(kind) => {
                    let kind = self.fail(g.sub, kind);
                    let mut text = String::new();
                    failure_stub(&mut text, &kind, self.listing, self.range(g.sub));
                    text
                }
            },
            (Some(g), Some(Err(kind))) => {
                let mut text = String::new();
                failure_stub(&mut text, &kind, self.listing, self.range(g.sub));
                text
            }
            _ => String::new(),
        };

        let mut prototypes = String::new();
        let mut bodies = Vec::with_capacity(subs.len());
        for &sub in &subs {
            let Some(result) = built.remove(&sub) else {
                continue;
            };
            let text = match result {
                Ok(tree) => self
                    .print_body(sub, &tree, &symbols)
                    .map_err(|kind| self.fail(sub, kind)),
                Err(kind) => Err(kind),
            };
            match text {
                Ok(text) => {
                    if Some(sub) != entry_sub {
                        let mut printer =
                            Printer::new(&self.analysis, self.inputs.dialect, &mut self.structs, &symbols);
                        printer.signature(sub, ";");
                        prototypes.push_str(&printer.finish());
                    }
                    bodies.push(text);
                }
                Err(kind) => {
                    // Callers still name it, so keep its prototype.
                    if Some(sub) != entry_sub && self.interface(sub).is_some() {
                        let mut printer =
                            Printer::new(&self.analysis, self.inputs.dialect, &mut self.structs, &symbols);
                        printer.signature(sub, ";");
                        prototypes.push_str(&printer.finish());
                    }
                    let mut text = String::new();
                    failure_stub(&mut text, &kind, self.listing, self.range(sub));
                    bodies.push(text);
                }
            }
        }

        let mut source = String::new();
        for st in self.structs.definitions() {
            let _ = writeln!(source, "struct {} {{", st.name);
            for member in &st.members {
                let _ = writeln!(source, "    {} {};", member.ty, member.name);
            }
            source.push_str("};\n\n");
        }
        for section in [globals_text, prototypes] {
            if !section.is_empty() {
                source.push_str(&section);
                source.push('\n');
            }
        }
        source.push_str(&bodies.join("\n"));

        self.ambiguities.sort_by_key(|a| a.entry);
        Decompiler {
            subroutines,
            ambiguities: self.ambiguities,
            source,
        }
    }

    fn build_globals(&mut self, globals: &GlobalsRoutine) -> Result<Built, AmbiguityKind> {
        let Some(layout) = self.layout(globals.sub) else {
            let kind = self.inputs.layouts.results[globals.sub]
                .clone()
                .err()
                .unwrap_or(AmbiguityKind::StackShape(globals.savebp));
            return Err(self.fail(globals.sub, kind));
        };
        let builder = Builder::new(
            self.inputs,
            &mut self.analysis,
            globals.sub,
            layout,
            globals.size,
            true,
        );
        builder
            .globals(globals.savebp)
            .map_err(|kind| self.fail(globals.sub, kind))
    }

    fn build(&mut self, sub: usize, globals_size: i32) -> Result<Built, AmbiguityKind> {
        let inputs = self.inputs;
        let layout = match &inputs.layouts.results[sub] {
            Ok(layout) => layout,
            Err(kind) => return Err(self.fail(sub, kind.clone())),
        };
        let builder = Builder::new(inputs, &mut self.analysis, sub, layout, globals_size, false);
        builder.subroutine().map_err(|kind| self.fail(sub, kind))
    }

    /// Names, parameter groups and return types of every subroutine.
    fn symbols(&mut self, subs: &[usize], entry_sub: Option<usize>) -> Symbols {
        let count = self.inputs.partition.len();
        let mut symbols = Symbols {
            sub_names: vec![String::new(); count],
            params: vec![Vec::new(); count],
            returns: vec![DataType::Void; count],
            names: HashMap::new(),
        };

        let mut n = 0;
        for &var in &self.analysis.globals {
            if self.analysis.vars.is_group_start(var) {
                n += 1;
                symbols.names.insert(var, format!("g{}", n));
            }
        }

        let mut numbered = 0;
        for &sub in subs {
            symbols.sub_names[sub] = if Some(sub) == entry_sub {
                match self.stub.conditional {
                    true => "StartingConditional".to_string(),
                    false => "main".to_string(),
                }
            } else {
                numbered += 1;
                format!("sub{}", numbered)
            };

            let params = &self.analysis.params[sub];
            let mut at = 0;
            while at < params.len() {
                let (start, len) = self.analysis.vars.group(params[at]);
                let len = (len - (params[at] - start)).min(params.len() - at);
                symbols.params[sub].push((params[at], len));
                symbols
                    .names
                    .insert(params[at], format!("p{}", symbols.params[sub].len()));
                at += len;
            }
            symbols.returns[sub] = self.return_type(sub, Some(sub) == entry_sub);
        }
        symbols
    }

    fn return_type(&mut self, sub: usize, is_entry: bool) -> DataType {
        if is_entry {
            return match self.stub.conditional {
                true => DataType::Int,
                false => DataType::Void,
            };
        }
        let Some(interface) = self.interface(sub) else {
            return DataType::Void;
        };
        let slots = interface.ret / 4;
        let reserved = &self.analysis.ret_slots[sub];
        match slots {
            0 => DataType::Void,
            1 => match reserved.first() {
                Some(ty) if ty.is_known() => ty.clone(),
                _ => self.analysis.returns[sub]
                    .as_ref()
                    .map_or(DataType::Int, literal_type),
            },
            3 if reserved.iter().all(|ty| *ty == DataType::Float) => DataType::Vector,
            _ => {
                if let Some(Expr::Var { first, count }) = &self.analysis.returns[sub]
                    && self.analysis.vars.group(*first) == (*first, *count)
                {
                    return self.analysis.vars.group_type(*first, &mut self.structs);
                }
                let members = (0..slots)
                    .map(|n| match reserved.get(n) {
                        Some(ty) if ty.is_known() => ty.clone(),
                        _ => DataType::Int,
                    })
                    .collect();
                DataType::Struct(self.structs.intern(members))
            }
        }
    }

    fn print_globals(&mut self, built: &Built, symbols: &Symbols) -> Result<String, AmbiguityKind> {
        let mut printer = Printer::new(&self.analysis, self.inputs.dialect, &mut self.structs, symbols);
        printer.body(&built.tree, built.root, 0)?;
        Ok(printer.finish())
    }

    fn print_body(&mut self, sub: usize, built: &Built, symbols: &Symbols) -> Result<String, AmbiguityKind> {
        let mut printer = Printer::new(&self.analysis, self.inputs.dialect, &mut self.structs, symbols);
        printer.signature(sub, " {");
        printer.body(&built.tree, built.root, 1)?;
        printer.raw("}\n");
        Ok(printer.finish())
    }
}

fn literal_type(expr: &Expr) -> DataType {
    match expr {
        Expr::Float(_) => DataType::Float,
        Expr::Str(_) => DataType::String,
        Expr::Object(_) => DataType::Object,
        _ => DataType::Int,
    }
}

/// Comment block standing in for a subroutine that could not be rebuilt.
fn failure_stub(out: &mut String, kind: &AmbiguityKind, listing: &[String], range: Range<usize>) {
    let _ = writeln!(out, "// decompilation failed: {}", kind);
    for line in listing.get(range).unwrap_or_default() {
        let _ = writeln!(out, "// {}", line);
    }
}
