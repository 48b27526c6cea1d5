#![allow(dead_code)]

use nwscript::{CallSnapshot, CompileOptions, ExecutionOptions, Program, compile, execute};
use once_cell::sync::Lazy;

pub struct Script {
    pub name: &'static str,
    pub source: &'static str,
    /// Engine calls of a default run, as rendered by [`render_call`].
    pub expected: &'static [&'static str],
}

/// Scripts covering the statement and expression forms the compiler
/// accepts. Every one of them halts and makes at least one engine call.
/// Engine routines return the zero value of their type.
pub static CORPUS: Lazy<Vec<Script>> = Lazy::new(|| {
    vec![
        Script {
            name: "countdown",
            source: r#"
                void main() {
                    int value = 3;
                    while (value > 0) {
                        if (value > 0) {
                            PrintInteger(value);
                            value -= 1;
                        }
                    }
                }
            "#,
            expected: &[
                "PrintInteger(3)",
                "PrintInteger(2)",
                "PrintInteger(1)",
            ],
        },
        Script {
            name: "for_continue_break",
            source: r#"
                void main() {
                    int i;
                    for (i = 0; i < 10; i++) {
                        if (i == 7) {
                            break;
                        }
                        if (i % 3 == 0) {
                            continue;
                        }
                        PrintInteger(i);
                    }
                    PrintInteger(i);
                }
            "#,
            expected: &[
                "PrintInteger(1)",
                "PrintInteger(2)",
                "PrintInteger(4)",
                "PrintInteger(5)",
                "PrintInteger(7)",
            ],
        },
        Script {
            name: "do_while_logic",
            source: r#"
                void main() {
                    int n = 0;
                    int flags = 0x0F;
                    do {
                        if ((n & 1) != 0 || n == 4 && flags > 3) {
                            PrintInteger(n << 2);
                        } else if (!n) {
                            PrintInteger(~n);
                        } else {
                            PrintInteger(-n);
                        }
                        n++;
                        flags >>= 1;
                    } while (n < 6);
                }
            "#,
            expected: &[
                "PrintInteger(-1)",
                "PrintInteger(4)",
                "PrintInteger(-2)",
                "PrintInteger(12)",
                "PrintInteger(-4)",
                "PrintInteger(20)",
            ],
        },
        Script {
            name: "switch_strings_and_globals",
            source: r#"
                int gTotal = 10;
                string gTag = "alpha";

                void main() {
                    switch (gTag) {
                        case "beta":
                            PrintString("b");
                            break;
                        case "alpha":
                            gTotal += 5;
                        default:
                            PrintInteger(gTotal);
                    }
                    gTotal--;
                    PrintInteger(gTotal);
                }
            "#,
            expected: &[
                "PrintInteger(15)",
                "PrintInteger(14)",
            ],
        },
        Script {
            name: "starting_conditional",
            source: r#"
                int StartingConditional() {
                    int hour = GetTimeHour();
                    PrintInteger(hour);
                    return hour < 12;
                }
            "#,
            expected: &[
                "GetTimeHour()",
                "PrintInteger(0)",
            ],
        },
        Script {
            name: "functions_and_floats",
            source: r#"
                float Average(float a, float b) {
                    return (a + b) / 2.0;
                }

                int Clamp(int value, int low, int high) {
                    if (value < low) {
                        return low;
                    }
                    if (value > high) {
                        return high;
                    }
                    return value;
                }

                void main() {
                    PrintFloat(Average(1.5, 2.25));
                    PrintInteger(Clamp(15, 0, 10));
                    PrintInteger(Clamp(-3, 0, 10));
                    PrintString(FloatToString(IntToFloat(Clamp(4, 0, 10)) * 0.5));
                }
            "#,
            expected: &[
                "PrintFloat(1.875)",
                "PrintInteger(10)",
                "PrintInteger(0)",
                "IntToFloat(4)",
                "FloatToString(0.0, 18, 9)",
                "PrintString(\"\")",
            ],
        },
        Script {
            name: "vectors",
            source: r#"
                vector Offset(vector v, float d) {
                    return v + [d, d, 0.0];
                }

                void main() {
                    vector position = GetPosition(OBJECT_SELF);
                    vector moved = Offset(position, 2.0);
                    moved.z = moved.x * 3.0;
                    PrintFloat(moved.z);
                    PrintFloat(VectorMagnitude(moved - position));
                }
            "#,
            expected: &[
                "GetPosition(object#0)",
                "PrintFloat(6.0)",
                "VectorMagnitude([2.0, 2.0, 6.0])",
                "PrintFloat(0.0)",
            ],
        },
        Script {
            name: "structs",
            source: r#"
                struct Entry {
                    string tag;
                    int count;
                    float weight;
                };

                struct Entry Make(string tag, int count) {
                    struct Entry e;
                    e.tag = tag;
                    e.count = count;
                    e.weight = IntToFloat(count) * 1.5;
                    return e;
                }

                void main() {
                    struct Entry e = Make("gem", 3);
                    PrintString(e.tag);
                    PrintInteger(e.count);
                    PrintFloat(e.weight);
                }
            "#,
            expected: &[
                "IntToFloat(3)",
                "PrintString(\"gem\")",
                "PrintInteger(3)",
                "PrintFloat(0.0)",
            ],
        },
        Script {
            name: "deferred_actions",
            source: r#"
                void main() {
                    object self = OBJECT_SELF;
                    int n = 2;
                    DelayCommand(0.5, PrintInteger(n));
                    AssignCommand(self, ClearAllActions());
                    PrintObject(self);
                }
            "#,
            expected: &[
                "DelayCommand(0.5, <action>)",
                "AssignCommand(object#0, <action>)",
                "PrintObject(object#0)",
            ],
        },
    ]
});

pub fn compile_ok(source: &str) -> Program {
    compile(source, &CompileOptions::default())
        .unwrap_or_else(|e| panic!("{}\n{}", nwscript::render_error_to_string_no_color(&e), source))
}

/// `Name(arg, ...)` with arguments in declaration order.
pub fn render_call(call: &CallSnapshot) -> String {
    let args: Vec<String> = call.args.iter().map(|arg| format!("{:?}", arg)).collect();
    format!("{}({})", call.name, args.join(", "))
}

/// Engine calls of a run that must halt.
pub fn calls(program: &Program) -> Vec<CallSnapshot> {
    let result = execute(program, &ExecutionOptions::default());
    assert!(result.is_halted(), "{:?}", result.outcome);
    result.snapshots
}
