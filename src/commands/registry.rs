//! Command metadata: argument decoders, flags and the name registry

use std::collections::HashMap;

use thiserror::Error;

use super::{CommandError, flag};
use crate::session::Session;
use crate::value::Value;
use crate::wire::Payload;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("command {0:?} already registered")]
    Duplicate(String),
}

/// Coercion applied to one wire argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Raw bytes, taken as-is.
    Bytes,
    /// UTF-8 text; invalid encodings are a typed error.
    Str,
    /// Signed base-10 integer.
    Int,
}

impl ArgKind {
    fn decode(self, item: &Value) -> Result<Arg, CommandError> {
        match self {
            ArgKind::Bytes => Ok(Arg::Bytes(item.clone())),
            ArgKind::Str => item
                .as_utf8()
                .map(|s| Arg::Str(s.to_owned()))
                .map_err(|_| CommandError::NotStr),
            ArgKind::Int => item
                .to_i64()
                .map(Arg::Int)
                .map_err(|_| CommandError::NotInt),
        }
    }
}

/// One decoded argument.
#[derive(Debug, Clone)]
pub enum Arg {
    Bytes(Value),
    Str(String),
    Int(i64),
}

impl Arg {
    pub fn bytes(&self) -> Result<&Value, CommandError> {
        match self {
            Arg::Bytes(v) => Ok(v),
            _ => Err(CommandError::ArgMismatch),
        }
    }
}

/// The decoded argument list a handler receives: the fixed positions
/// declared by the command plus whatever a trailing variadic consumed.
#[derive(Debug)]
pub struct Args {
    fixed: Vec<Arg>,
    rest: Vec<Arg>,
}

impl Args {
    pub fn bytes(&self, i: usize) -> Result<&Value, CommandError> {
        match self.fixed.get(i) {
            Some(Arg::Bytes(v)) => Ok(v),
            _ => Err(CommandError::ArgMismatch),
        }
    }

    pub fn str(&self, i: usize) -> Result<&str, CommandError> {
        match self.fixed.get(i) {
            Some(Arg::Str(s)) => Ok(s),
            _ => Err(CommandError::ArgMismatch),
        }
    }

    pub fn int(&self, i: usize) -> Result<i64, CommandError> {
        match self.fixed.get(i) {
            Some(Arg::Int(n)) => Ok(*n),
            _ => Err(CommandError::ArgMismatch),
        }
    }

    pub fn rest(&self) -> &[Arg] {
        &self.rest
    }

    pub fn rest_bytes(&self) -> Result<Vec<Value>, CommandError> {
        self.rest.iter().map(|a| a.bytes().cloned()).collect()
    }
}

pub type CommandFn = Box<dyn Fn(&Session, &Args) -> Result<Payload, CommandError> + Send + Sync>;

/// A registered command: its flag set, argument spec and body. The session
/// is handed to every body; a variadic decoder, when present, is trailing
/// and consumes zero or more remaining wire arguments.
pub struct Command {
    flags: u8,
    fixed: Vec<ArgKind>,
    variadic: Option<ArgKind>,
    run: CommandFn,
}

impl Command {
    pub fn flags(&self) -> u8 {
        self.flags
    }

    fn decode(&self, items: &[Value]) -> Result<Args, CommandError> {
        let need = self.fixed.len();
        let count_ok = if self.variadic.is_some() {
            items.len() >= need
        } else {
            items.len() == need
        };
        if !count_ok {
            return Err(CommandError::WrongNumberOfArguments);
        }

        let mut fixed = Vec::with_capacity(need);
        for (kind, item) in self.fixed.iter().zip(items) {
            fixed.push(kind.decode(item)?);
        }
        let rest = match self.variadic {
            Some(kind) => items[need..]
                .iter()
                .map(|item| kind.decode(item))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        Ok(Args { fixed, rest })
    }

    /// Runs the full invocation pipeline: auth gate, arity, in-order
    /// decode, body.
    pub fn execute(&self, session: &Session, items: &[Value]) -> Result<Payload, CommandError> {
        if flag::has(self.flags, flag::AUTH) && !session.authenticated() {
            return Err(CommandError::AuthRequired);
        }
        let args = self.decode(items)?;
        (self.run)(session, &args)
    }
}

/// Options captured once at registry build time; not mutable afterwards.
#[derive(Debug, Default, Clone)]
pub struct RegistryOptions {
    /// Shared password; empty disables authentication entirely.
    pub password: String,
}

impl RegistryOptions {
    pub fn auth_enabled(&self) -> bool {
        !self.password.is_empty()
    }
}

/// Name to command mapping. Dispatch is case-sensitive; built-ins register
/// under uppercase names.
pub struct Registry {
    commands: HashMap<String, Command>,
}

impl Registry {
    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Chained registration with the build-time checks: unique names, and the
/// auth flag masked off everywhere when authentication is disabled.
pub struct RegistryBuilder {
    commands: HashMap<String, Command>,
    auth_enabled: bool,
    error: Option<RegistryError>,
}

impl RegistryBuilder {
    pub fn new(opts: &RegistryOptions) -> Self {
        Self {
            commands: HashMap::new(),
            auth_enabled: opts.auth_enabled(),
            error: None,
        }
    }

    pub fn cmd(
        mut self,
        name: &str,
        flags: u8,
        fixed: &[ArgKind],
        variadic: Option<ArgKind>,
        run: CommandFn,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.commands.contains_key(name) {
            self.error = Some(RegistryError::Duplicate(name.to_owned()));
            return self;
        }
        let mut flags = flags;
        if !self.auth_enabled {
            flags &= !flag::AUTH;
        }
        self.commands.insert(
            name.to_owned(),
            Command {
                flags,
                fixed: fixed.to_vec(),
                variadic,
                run,
            },
        );
        self
    }

    pub fn build(self) -> Result<Registry, RegistryError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(Registry {
                commands: self.commands,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn noop() -> CommandFn {
        Box::new(|_, _| Ok(Payload::Nil))
    }

    fn session() -> Session {
        Session::new(Arc::new(crate::store::Storage::new()))
    }

    #[test]
    fn test_duplicate_name_is_a_registration_error() {
        let opts = RegistryOptions::default();
        let built = RegistryBuilder::new(&opts)
            .cmd("PING", flag::READ, &[], None, noop())
            .cmd("PING", flag::READ, &[], None, noop())
            .build();
        assert!(matches!(built, Err(RegistryError::Duplicate(name)) if name == "PING"));
    }

    #[test]
    fn test_arity_exact_and_variadic() {
        let opts = RegistryOptions::default();
        let registry = RegistryBuilder::new(&opts)
            .cmd("TWO", flag::READ, &[ArgKind::Bytes, ArgKind::Int], None, noop())
            .cmd(
                "MANY",
                flag::READ,
                &[ArgKind::Bytes],
                Some(ArgKind::Bytes),
                noop(),
            )
            .build()
            .unwrap();
        let s = session();

        let two = registry.get("TWO").unwrap();
        let items = |n: usize| -> Vec<Value> {
            (0..n).map(|i| Value::from(i.to_string())).collect()
        };
        assert_eq!(
            two.execute(&s, &items(1)),
            Err(CommandError::WrongNumberOfArguments)
        );
        assert_eq!(
            two.execute(&s, &items(3)),
            Err(CommandError::WrongNumberOfArguments)
        );
        assert!(two.execute(&s, &items(2)).is_ok());

        let many = registry.get("MANY").unwrap();
        assert_eq!(
            many.execute(&s, &[]),
            Err(CommandError::WrongNumberOfArguments)
        );
        assert!(many.execute(&s, &items(1)).is_ok());
        assert!(many.execute(&s, &items(5)).is_ok());
    }

    #[test]
    fn test_coercion_failures_are_typed() {
        let opts = RegistryOptions::default();
        let registry = RegistryBuilder::new(&opts)
            .cmd("N", flag::READ, &[ArgKind::Int], None, noop())
            .cmd("S", flag::READ, &[ArgKind::Str], None, noop())
            .build()
            .unwrap();
        let s = session();

        let n = registry.get("N").unwrap();
        assert_eq!(
            n.execute(&s, &[Value::from("abc")]),
            Err(CommandError::NotInt)
        );
        let cmd_s = registry.get("S").unwrap();
        assert_eq!(
            cmd_s.execute(&s, &[Value::new(vec![0xff])]),
            Err(CommandError::NotStr)
        );
    }

    #[test]
    fn test_auth_flag_masked_when_auth_disabled() {
        let guarded = |opts: &RegistryOptions| {
            RegistryBuilder::new(opts)
                .cmd("X", flag::READ | flag::AUTH, &[], None, noop())
                .build()
                .unwrap()
        };

        let s = session();

        let enabled = guarded(&RegistryOptions {
            password: "secret".into(),
        });
        assert_eq!(
            enabled.get("X").unwrap().execute(&s, &[]),
            Err(CommandError::AuthRequired)
        );

        let disabled = guarded(&RegistryOptions::default());
        assert!(disabled.get("X").unwrap().execute(&s, &[]).is_ok());
    }

    #[test]
    fn test_decoded_args_reach_the_handler_in_order() {
        let opts = RegistryOptions::default();
        let registry = RegistryBuilder::new(&opts)
            .cmd(
                "MIX",
                flag::READ,
                &[ArgKind::Bytes, ArgKind::Int],
                Some(ArgKind::Bytes),
                Box::new(|_, args| {
                    assert_eq!(args.bytes(0)?, &Value::from("key"));
                    assert_eq!(args.int(1)?, 9);
                    assert_eq!(args.rest().len(), 2);
                    Ok(Payload::Bool(true))
                }),
            )
            .build()
            .unwrap();
        let s = session();
        let reply = registry
            .get("MIX")
            .unwrap()
            .execute(
                &s,
                &[
                    Value::from("key"),
                    Value::from("9"),
                    Value::from("a"),
                    Value::from("b"),
                ],
            )
            .unwrap();
        assert_eq!(reply, Payload::Bool(true));
    }
}
