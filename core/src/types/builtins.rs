//! Engine routine and constant tables.
//!
//! This is configuration data, not logic: a representative subset of the
//! `nwscript.nss` declarations shipped with each game. Entries are shared by
//! both dialects unless listed in one of the dialect sections at the bottom.

use crate::vm::EngineType;

/// Parameter and return types that can appear in an engine declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    Void,
    Int,
    Float,
    String,
    Object,
    Engine(EngineType),
    Vector,
    Action,
}

/// Literal used for parameter defaults and constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lit {
    Int(i32),
    Float(f32),
    Str(&'static str),
    Object(i32),
    Vector([f32; 3]),
}

pub struct Param {
    pub name: &'static str,
    pub ty: Ty,
    pub default: Option<Lit>,
}

pub struct Routine {
    pub id: u16,
    pub name: &'static str,
    pub ret: Ty,
    pub params: &'static [Param],
}

const fn p(name: &'static str, ty: Ty) -> Param {
    Param {
        name,
        ty,
        default: None,
    }
}

const fn d(name: &'static str, ty: Ty, default: Lit) -> Param {
    Param {
        name,
        ty,
        default: Some(default),
    }
}

const fn r(id: u16, name: &'static str, ret: Ty, params: &'static [Param]) -> Routine {
    Routine {
        id,
        name,
        ret,
        params,
    }
}

const EFFECT: Ty = Ty::Engine(EngineType::Effect);
const EVENT: Ty = Ty::Engine(EngineType::Event);
const LOCATION: Ty = Ty::Engine(EngineType::Location);
const TALENT: Ty = Ty::Engine(EngineType::Talent);

pub static COMMON_ROUTINES: &[Routine] = &[
    r(0, "Random", Ty::Int, &[p("nMaxInteger", Ty::Int)]),
    r(1, "PrintString", Ty::Void, &[p("sString", Ty::String)]),
    r(
        2,
        "PrintFloat",
        Ty::Void,
        &[
            p("fFloat", Ty::Float),
            d("nWidth", Ty::Int, Lit::Int(18)),
            d("nDecimals", Ty::Int, Lit::Int(9)),
        ],
    ),
    r(
        3,
        "FloatToString",
        Ty::String,
        &[
            p("fFloat", Ty::Float),
            d("nWidth", Ty::Int, Lit::Int(18)),
            d("nDecimals", Ty::Int, Lit::Int(9)),
        ],
    ),
    r(4, "PrintInteger", Ty::Void, &[p("nInteger", Ty::Int)]),
    r(5, "PrintObject", Ty::Void, &[p("oObject", Ty::Object)]),
    r(
        6,
        "AssignCommand",
        Ty::Void,
        &[p("oActionSubject", Ty::Object), p("aActionToAssign", Ty::Action)],
    ),
    r(
        7,
        "DelayCommand",
        Ty::Void,
        &[p("fSeconds", Ty::Float), p("aActionToDelay", Ty::Action)],
    ),
    r(
        8,
        "ExecuteScript",
        Ty::Void,
        &[
            p("sScript", Ty::String),
            p("oTarget", Ty::Object),
            d("nScriptVar", Ty::Int, Lit::Int(-1)),
        ],
    ),
    r(9, "ClearAllActions", Ty::Void, &[]),
    r(10, "SetFacing", Ty::Void, &[p("fDirection", Ty::Float)]),
    r(16, "GetTimeHour", Ty::Int, &[]),
    r(17, "GetTimeMinute", Ty::Int, &[]),
    r(24, "GetArea", Ty::Object, &[p("oTarget", Ty::Object)]),
    r(25, "GetEnteringObject", Ty::Object, &[]),
    r(26, "GetExitingObject", Ty::Object, &[]),
    r(27, "GetPosition", Ty::Vector, &[p("oTarget", Ty::Object)]),
    r(28, "GetFacing", Ty::Float, &[p("oTarget", Ty::Object)]),
    r(
        30,
        "GetItemPossessedBy",
        Ty::Object,
        &[p("oCreature", Ty::Object), p("sItemTag", Ty::String)],
    ),
    r(67, "fabs", Ty::Float, &[p("fValue", Ty::Float)]),
    r(68, "cos", Ty::Float, &[p("fValue", Ty::Float)]),
    r(69, "sin", Ty::Float, &[p("fValue", Ty::Float)]),
    r(70, "tan", Ty::Float, &[p("fValue", Ty::Float)]),
    r(75, "pow", Ty::Float, &[p("fValue", Ty::Float), p("fExponent", Ty::Float)]),
    r(76, "sqrt", Ty::Float, &[p("fValue", Ty::Float)]),
    r(77, "abs", Ty::Int, &[p("nValue", Ty::Int)]),
    r(78, "EffectHeal", EFFECT, &[p("nDamageToHeal", Ty::Int)]),
    r(92, "IntToString", Ty::String, &[p("nInteger", Ty::Int)]),
    r(142, "VectorMagnitude", Ty::Float, &[p("vVector", Ty::Vector)]),
    r(168, "GetTag", Ty::String, &[p("oObject", Ty::Object)]),
    r(
        200,
        "GetObjectByTag",
        Ty::Object,
        &[p("sTag", Ty::String), d("nNth", Ty::Int, Lit::Int(0))],
    ),
    r(
        215,
        "Location",
        LOCATION,
        &[p("vPosition", Ty::Vector), p("fOrientation", Ty::Float)],
    ),
    r(
        220,
        "ApplyEffectToObject",
        Ty::Void,
        &[
            p("nDurationType", Ty::Int),
            p("eEffect", EFFECT),
            p("oTarget", Ty::Object),
            d("fDuration", Ty::Float, Lit::Float(0.0)),
        ],
    ),
    r(226, "GetLocation", LOCATION, &[p("oObject", Ty::Object)]),
    r(230, "IntToFloat", Ty::Float, &[p("nInteger", Ty::Int)]),
    r(231, "FloatToInt", Ty::Int, &[p("fFloat", Ty::Float)]),
    r(232, "StringToInt", Ty::Int, &[p("sNumber", Ty::String)]),
    r(233, "StringToFloat", Ty::Float, &[p("sNumber", Ty::String)]),
    r(
        276,
        "GetIsEnemy",
        Ty::Int,
        &[p("oTarget", Ty::Object), d("oSource", Ty::Object, Lit::Object(0))],
    ),
    r(
        301,
        "TalentSpell",
        TALENT,
        &[p("nSpell", Ty::Int)],
    ),
    r(
        345,
        "SignalEvent",
        Ty::Void,
        &[p("oObject", Ty::Object), p("evToRun", EVENT)],
    ),
    r(346, "EventUserDefined", EVENT, &[p("nUserDefinedEventNumber", Ty::Int)]),
    r(548, "GetFirstPC", Ty::Object, &[]),
    r(549, "GetNextPC", Ty::Object, &[]),
    r(578, "GetGlobalBoolean", Ty::Int, &[p("sIdentifier", Ty::String)]),
    r(
        579,
        "SetGlobalBoolean",
        Ty::Void,
        &[p("sIdentifier", Ty::String), p("nValue", Ty::Int)],
    ),
    r(580, "GetGlobalNumber", Ty::Int, &[p("sIdentifier", Ty::String)]),
    r(
        581,
        "SetGlobalNumber",
        Ty::Void,
        &[p("sIdentifier", Ty::String), p("nValue", Ty::Int)],
    ),
];

/// Routines only the first game declares.
pub static K1_ROUTINES: &[Routine] = &[
    r(
        204,
        "ActionStartConversation",
        Ty::Void,
        &[
            p("oObjectToConverse", Ty::Object),
            d("sDialogResRef", Ty::String, Lit::Str("")),
            d("bPrivateConversation", Ty::Int, Lit::Int(0)),
        ],
    ),
    r(771, "YavinHackCloseDoor", Ty::Void, &[p("oDoorToClose", Ty::Object)]),
];

/// Routines only the second game declares, or declares differently.
pub static TSL_ROUTINES: &[Routine] = &[
    r(
        204,
        "ActionStartConversation",
        Ty::Void,
        &[
            p("oObjectToConverse", Ty::Object),
            d("sDialogResRef", Ty::String, Lit::Str("")),
            d("bPrivateConversation", Ty::Int, Lit::Int(0)),
            d("nBarkX", Ty::Int, Lit::Int(-1)),
            d("nBarkY", Ty::Int, Lit::Int(-1)),
        ],
    ),
    r(768, "GetScriptParameter", Ty::Int, &[p("nIndex", Ty::Int)]),
    r(769, "GetScriptStringParameter", Ty::String, &[]),
    r(
        776,
        "AdjustCreatureAttributes",
        Ty::Void,
        &[
            p("oObject", Ty::Object),
            p("nAttribute", Ty::Int),
            p("nAmount", Ty::Int),
        ],
    ),
];

pub static COMMON_CONSTANTS: &[(&str, Lit)] = &[
    ("TRUE", Lit::Int(1)),
    ("FALSE", Lit::Int(0)),
    ("PI", Lit::Float(3.141_592_7)),
    ("OBJECT_SELF", Lit::Object(0)),
    ("OBJECT_INVALID", Lit::Object(1)),
    ("DURATION_TYPE_INSTANT", Lit::Int(0)),
    ("DURATION_TYPE_TEMPORARY", Lit::Int(1)),
    ("DURATION_TYPE_PERMANENT", Lit::Int(2)),
    ("OBJECT_TYPE_CREATURE", Lit::Int(1)),
    ("OBJECT_TYPE_ITEM", Lit::Int(2)),
    ("OBJECT_TYPE_TRIGGER", Lit::Int(4)),
    ("OBJECT_TYPE_DOOR", Lit::Int(8)),
    ("OBJECT_TYPE_PLACEABLE", Lit::Int(64)),
    ("ABILITY_STRENGTH", Lit::Int(0)),
    ("ABILITY_DEXTERITY", Lit::Int(1)),
    ("ABILITY_CONSTITUTION", Lit::Int(2)),
    ("ABILITY_INTELLIGENCE", Lit::Int(3)),
    ("ABILITY_WISDOM", Lit::Int(4)),
    ("ABILITY_CHARISMA", Lit::Int(5)),
];

pub static K1_CONSTANTS: &[(&str, Lit)] = &[("NUM_INSTANCE_TYPES", Lit::Int(13))];

pub static TSL_CONSTANTS: &[(&str, Lit)] = &[
    ("NUM_INSTANCE_TYPES", Lit::Int(15)),
    ("SCRIPT_PARAMETER_COUNT", Lit::Int(5)),
];
