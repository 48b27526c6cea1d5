//! Per-game dialect tables.
//!
//! Each dialect is built once from the static tables in
//! [`crate::types::builtins`] and shared immutably by every compile,
//! decompile and execute call that selects it.

use core::fmt;
use core::str::FromStr;

use hashbrown::HashMap;
use once_cell::sync::Lazy;

use crate::types::DataType;
use crate::types::builtins::{self, Lit, Routine, Ty};

/// Selects which game's routine table and opcode set apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Game {
    /// Knights of the Old Republic.
    #[default]
    K1,
    /// The Sith Lords.
    Tsl,
}

impl Game {
    pub fn dialect(self) -> &'static Dialect {
        match self {
            Game::K1 => &K1,
            Game::Tsl => &TSL,
        }
    }

    /// Whether the legacy `STORE_STATEALL` opcode is executable.
    pub fn supports_store_state_all(self) -> bool {
        self == Game::K1
    }
}

impl FromStr for Game {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "k1" | "kotor" => Ok(Game::K1),
            "k2" | "tsl" => Ok(Game::Tsl),
            other => Err(format!("unknown game '{}', expected k1 or tsl", other)),
        }
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Game::K1 => f.write_str("k1"),
            Game::Tsl => f.write_str("tsl"),
        }
    }
}

/// Compile-time value of a constant or default argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Int(i32),
    Float(f32),
    String(String),
    Object(i32),
    Vector([f32; 3]),
}

impl ConstantValue {
    pub fn data_type(&self) -> DataType {
        match self {
            ConstantValue::Int(_) => DataType::Int,
            ConstantValue::Float(_) => DataType::Float,
            ConstantValue::String(_) => DataType::String,
            ConstantValue::Object(_) => DataType::Object,
            ConstantValue::Vector(_) => DataType::Vector,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSignature {
    pub name: String,
    pub ty: DataType,
    pub default: Option<ConstantValue>,
}

/// Signature of a callable routine: an engine builtin or a user function.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptFunctionSignature {
    pub name: String,
    /// Engine routine id; `None` for user functions.
    pub routine: Option<u16>,
    pub ret: DataType,
    pub params: Vec<ParamSignature>,
}

impl ScriptFunctionSignature {
    /// Number of leading parameters without a default.
    pub fn required_params(&self) -> usize {
        self.params
            .iter()
            .position(|p| p.default.is_some())
            .unwrap_or(self.params.len())
    }

    /// Bytes the arguments occupy on the stack.
    pub fn param_bytes(&self) -> usize {
        self.params.iter().map(|p| p.ty.size()).sum()
    }
}

/// The immutable routine and constant tables of one game.
pub struct Dialect {
    pub game: Game,
    functions: Vec<ScriptFunctionSignature>,
    by_name: HashMap<String, usize>,
    by_routine: HashMap<u16, usize>,
    constants: HashMap<String, ConstantValue>,
}

impl Dialect {
    fn build(
        game: Game,
        routine_tables: &[&'static [Routine]],
        constant_tables: &[&'static [(&'static str, Lit)]],
    ) -> Dialect {
        let mut dialect = Dialect {
            game,
            functions: Vec::new(),
            by_name: HashMap::new(),
            by_routine: HashMap::new(),
            constants: HashMap::new(),
        };
        for table in routine_tables {
            for routine in table.iter() {
                dialect.insert(signature_of(routine));
            }
        }
        for table in constant_tables {
            for (name, lit) in table.iter() {
                dialect.constants.insert(name.to_string(), constant_of(*lit));
            }
        }
        dialect
    }

    /// Later tables override earlier entries with the same routine id.
    fn insert(&mut self, signature: ScriptFunctionSignature) {
        let Some(routine) = signature.routine else {
            return;
        };
        match self.by_routine.get(&routine) {
            Some(&index) => {
                self.by_name.remove(&self.functions[index].name);
                self.by_name.insert(signature.name.clone(), index);
                self.functions[index] = signature;
            }
            None => {
                let index = self.functions.len();
                self.by_name.insert(signature.name.clone(), index);
                self.by_routine.insert(routine, index);
                self.functions.push(signature);
            }
        }
    }

    pub fn function(&self, name: &str) -> Option<&ScriptFunctionSignature> {
        self.by_name.get(name).map(|&i| &self.functions[i])
    }

    pub fn routine(&self, id: u16) -> Option<&ScriptFunctionSignature> {
        self.by_routine.get(&id).map(|&i| &self.functions[i])
    }

    pub fn constant(&self, name: &str) -> Option<&ConstantValue> {
        self.constants.get(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &ScriptFunctionSignature> {
        self.functions.iter()
    }
}

impl fmt::Debug for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialect")
            .field("game", &self.game)
            .field("functions", &self.functions.len())
            .field("constants", &self.constants.len())
            .finish()
    }
}

static K1: Lazy<Dialect> = Lazy::new(|| {
    Dialect::build(
        Game::K1,
        &[builtins::COMMON_ROUTINES, builtins::K1_ROUTINES],
        &[builtins::COMMON_CONSTANTS, builtins::K1_CONSTANTS],
    )
});

static TSL: Lazy<Dialect> = Lazy::new(|| {
    Dialect::build(
        Game::Tsl,
        &[builtins::COMMON_ROUTINES, builtins::TSL_ROUTINES],
        &[builtins::COMMON_CONSTANTS, builtins::TSL_CONSTANTS],
    )
});

fn type_of(ty: Ty) -> DataType {
    match ty {
        Ty::Void => DataType::Void,
        Ty::Int => DataType::Int,
        Ty::Float => DataType::Float,
        Ty::String => DataType::String,
        Ty::Object => DataType::Object,
        Ty::Engine(kind) => DataType::Engine(kind),
        Ty::Vector => DataType::Vector,
        Ty::Action => DataType::Action,
    }
}

fn constant_of(lit: Lit) -> ConstantValue {
    match lit {
        Lit::Int(v) => ConstantValue::Int(v),
        Lit::Float(v) => ConstantValue::Float(v),
        Lit::Str(s) => ConstantValue::String(s.to_string()),
        Lit::Object(id) => ConstantValue::Object(id),
        Lit::Vector(v) => ConstantValue::Vector(v),
    }
}

fn signature_of(routine: &Routine) -> ScriptFunctionSignature {
    ScriptFunctionSignature {
        name: routine.name.to_string(),
        routine: Some(routine.id),
        ret: type_of(routine.ret),
        params: routine
            .params
            .iter()
            .map(|param| ParamSignature {
                name: param.name.to_string(),
                ty: type_of(param.ty),
                default: param.default.map(constant_of),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_game_from_str() {
        assert_eq!("kotor".parse::<Game>(), Ok(Game::K1));
        assert_eq!("K2".parse::<Game>(), Ok(Game::Tsl));
        assert!("nwn".parse::<Game>().is_err());
    }

    #[test]
    fn test_shared_routines() {
        for game in [Game::K1, Game::Tsl] {
            let print = game.dialect().function("PrintInteger").unwrap();
            assert_eq!(print.routine, Some(4));
            assert_eq!(print.params[0].ty, DataType::Int);
        }
    }

    #[test]
    fn test_dialect_overrides() {
        let k1 = Game::K1.dialect().function("ActionStartConversation").unwrap();
        let tsl = Game::Tsl.dialect().function("ActionStartConversation").unwrap();
        assert_eq!(k1.params.len(), 3);
        assert_eq!(tsl.params.len(), 5);
        assert_eq!(tsl.required_params(), 1);
    }

    #[test]
    fn test_exclusive_routines() {
        assert!(Game::K1.dialect().function("GetScriptParameter").is_none());
        assert_eq!(
            Game::Tsl.dialect().routine(768).map(|s| s.name.as_str()),
            Some("GetScriptParameter")
        );
        assert!(Game::Tsl.dialect().routine(771).is_none());
    }

    #[test]
    fn test_constants() {
        let k1 = Game::K1.dialect();
        assert_eq!(k1.constant("TRUE"), Some(&ConstantValue::Int(1)));
        assert_eq!(k1.constant("NUM_INSTANCE_TYPES"), Some(&ConstantValue::Int(13)));
        assert_eq!(
            Game::Tsl.dialect().constant("NUM_INSTANCE_TYPES"),
            Some(&ConstantValue::Int(15))
        );
    }
}
