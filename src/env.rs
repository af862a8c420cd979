use std::{cell::RefCell, ffi::OsStr};

use crate::assembler::AsmOptions;

#[derive(Clone, Copy)]
struct Env {
    extensions: bool,
}

thread_local! {
    /// Must only be mutated within `set_env`
    static ENV: RefCell<Option<Env>> = const { RefCell::new(None) };
}

/// Read settings from the process environment. Call once, before anything else in this module.
pub fn init() {
    let value = Env {
        extensions: var_is("LC2_EXTENSIONS", "1"),
    };
    set_env(value);
}

/// Character literals and `.CHAR` are accepted.
pub fn extensions_enabled() -> bool {
    with_env(|env| env.extensions)
}

/// Assembler options matching the environment.
pub fn asm_options() -> AsmOptions {
    AsmOptions {
        extensions: extensions_enabled(),
    }
}

fn set_env(value: Env) {
    ENV.with(|env| {
        let mut env = env.borrow_mut();
        assert!(
            env.is_none(),
            "tried to initialize environment state multiple times"
        );
        *env = Some(value);
    });
}

fn with_env<F, R>(callback: F) -> R
where
    F: Fn(&Env) -> R,
{
    ENV.with(|env| {
        let env = env.borrow();
        let env = env.unwrap_or_else(|| {
            panic!("tried to access environment state before initialization");
        });
        callback(&env)
    })
}

fn var_is(name: impl AsRef<OsStr>, value: impl AsRef<str>) -> bool {
    std::env::var(name.as_ref()).is_ok_and(|v| v == value.as_ref())
}
