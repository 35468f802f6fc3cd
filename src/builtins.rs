//! Runtime functions that `extern` declarations can bind to.
//!
//! Both backends share this table: the JIT links against the `extern "C"`
//! entry points by symbol, the VM calls [`Builtin::call`] directly.

use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Sin,
    Cos,
    Tan,
    Atan2,
    Sqrt,
    Exp,
    Log,
    Pow,
    Fabs,
    Floor,
    Ceil,
    Fmod,
    Putchard,
    Printd,
}

impl Builtin {
    pub const ALL: [Builtin; 14] = [
        Builtin::Sin,
        Builtin::Cos,
        Builtin::Tan,
        Builtin::Atan2,
        Builtin::Sqrt,
        Builtin::Exp,
        Builtin::Log,
        Builtin::Pow,
        Builtin::Fabs,
        Builtin::Floor,
        Builtin::Ceil,
        Builtin::Fmod,
        Builtin::Putchard,
        Builtin::Printd,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|builtin| builtin.name() == name)
    }

    /// Name as written in source.
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Sin => "sin",
            Builtin::Cos => "cos",
            Builtin::Tan => "tan",
            Builtin::Atan2 => "atan2",
            Builtin::Sqrt => "sqrt",
            Builtin::Exp => "exp",
            Builtin::Log => "log",
            Builtin::Pow => "pow",
            Builtin::Fabs => "fabs",
            Builtin::Floor => "floor",
            Builtin::Ceil => "ceil",
            Builtin::Fmod => "fmod",
            Builtin::Putchard => "putchard",
            Builtin::Printd => "printd",
        }
    }

    /// Linker symbol of the native entry point.
    pub fn symbol(self) -> &'static str {
        match self {
            Builtin::Sin => "kscope_sin",
            Builtin::Cos => "kscope_cos",
            Builtin::Tan => "kscope_tan",
            Builtin::Atan2 => "kscope_atan2",
            Builtin::Sqrt => "kscope_sqrt",
            Builtin::Exp => "kscope_exp",
            Builtin::Log => "kscope_log",
            Builtin::Pow => "kscope_pow",
            Builtin::Fabs => "kscope_fabs",
            Builtin::Floor => "kscope_floor",
            Builtin::Ceil => "kscope_ceil",
            Builtin::Fmod => "kscope_fmod",
            Builtin::Putchard => "kscope_putchard",
            Builtin::Printd => "kscope_printd",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Builtin::Atan2 | Builtin::Pow | Builtin::Fmod => 2,
            _ => 1,
        }
    }

    pub fn address(self) -> *const u8 {
        match self {
            Builtin::Sin => kscope_sin as *const u8,
            Builtin::Cos => kscope_cos as *const u8,
            Builtin::Tan => kscope_tan as *const u8,
            Builtin::Atan2 => kscope_atan2 as *const u8,
            Builtin::Sqrt => kscope_sqrt as *const u8,
            Builtin::Exp => kscope_exp as *const u8,
            Builtin::Log => kscope_log as *const u8,
            Builtin::Pow => kscope_pow as *const u8,
            Builtin::Fabs => kscope_fabs as *const u8,
            Builtin::Floor => kscope_floor as *const u8,
            Builtin::Ceil => kscope_ceil as *const u8,
            Builtin::Fmod => kscope_fmod as *const u8,
            Builtin::Putchard => kscope_putchard as *const u8,
            Builtin::Printd => kscope_printd as *const u8,
        }
    }

    /// Evaluates the function in-process. Missing arguments read as NaN.
    pub fn call(self, args: &[f64]) -> f64 {
        let arg = |index: usize| args.get(index).copied().unwrap_or(f64::NAN);
        match self {
            Builtin::Sin => kscope_sin(arg(0)),
            Builtin::Cos => kscope_cos(arg(0)),
            Builtin::Tan => kscope_tan(arg(0)),
            Builtin::Atan2 => kscope_atan2(arg(0), arg(1)),
            Builtin::Sqrt => kscope_sqrt(arg(0)),
            Builtin::Exp => kscope_exp(arg(0)),
            Builtin::Log => kscope_log(arg(0)),
            Builtin::Pow => kscope_pow(arg(0), arg(1)),
            Builtin::Fabs => kscope_fabs(arg(0)),
            Builtin::Floor => kscope_floor(arg(0)),
            Builtin::Ceil => kscope_ceil(arg(0)),
            Builtin::Fmod => kscope_fmod(arg(0), arg(1)),
            Builtin::Putchard => kscope_putchard(arg(0)),
            Builtin::Printd => kscope_printd(arg(0)),
        }
    }
}

extern "C" fn kscope_sin(x: f64) -> f64 {
    x.sin()
}

extern "C" fn kscope_cos(x: f64) -> f64 {
    x.cos()
}

extern "C" fn kscope_tan(x: f64) -> f64 {
    x.tan()
}

extern "C" fn kscope_atan2(y: f64, x: f64) -> f64 {
    y.atan2(x)
}

extern "C" fn kscope_sqrt(x: f64) -> f64 {
    x.sqrt()
}

extern "C" fn kscope_exp(x: f64) -> f64 {
    x.exp()
}

extern "C" fn kscope_log(x: f64) -> f64 {
    x.ln()
}

extern "C" fn kscope_pow(x: f64, y: f64) -> f64 {
    x.powf(y)
}

extern "C" fn kscope_fabs(x: f64) -> f64 {
    x.abs()
}

extern "C" fn kscope_floor(x: f64) -> f64 {
    x.floor()
}

extern "C" fn kscope_ceil(x: f64) -> f64 {
    x.ceil()
}

extern "C" fn kscope_fmod(x: f64, y: f64) -> f64 {
    x % y
}

/// Writes the character with code `x` to stderr.
extern "C" fn kscope_putchard(x: f64) -> f64 {
    if let Some(c) = char::from_u32(x as u32) {
        let mut buf = [0u8; 4];
        let _ = io::stderr().write_all(c.encode_utf8(&mut buf).as_bytes());
    }
    0.0
}

/// Writes `x` and a newline to stderr.
extern "C" fn kscope_printd(x: f64) -> f64 {
    let _ = writeln!(io::stderr(), "{x:.6}");
    0.0
}
