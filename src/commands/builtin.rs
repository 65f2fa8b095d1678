//! The built-in command set

use super::registry::{ArgKind, Args, CommandFn, Registry, RegistryBuilder, RegistryError, RegistryOptions};
use super::{CommandError, flag};
use crate::session::Session;
use crate::store::RawStore;
use crate::store::object::{HashObject, ListObject, StoredValue};
use crate::value::Value;
use crate::wire::Payload;

const R: u8 = flag::READ | flag::AUTH;
const W: u8 = flag::WRITE | flag::AUTH;

/// Builds the full registry. The password is captured here and cannot change
/// at runtime; an empty one disables the auth gate registry-wide.
pub fn build_registry(opts: &RegistryOptions) -> Result<Registry, RegistryError> {
    use ArgKind::{Bytes, Int, Str};

    RegistryBuilder::new(opts)
        // security
        .cmd("AUTH", flag::READ, &[Str], None, auth(opts.password.clone()))
        // keyspace
        .cmd("KEYS", R, &[], None, Box::new(keys))
        .cmd("DEL", W, &[], Some(Bytes), Box::new(del))
        .cmd("TTL", R, &[Bytes], None, Box::new(ttl))
        .cmd("EXPIRE", W, &[Bytes, Int], None, Box::new(expire))
        // string
        .cmd("SET", W, &[Bytes, Bytes], None, Box::new(set))
        .cmd("GET", R, &[Bytes], None, Box::new(get))
        // list
        .cmd("LPUSH", W, &[Bytes], Some(Bytes), Box::new(lpush))
        .cmd("RPUSH", W, &[Bytes], Some(Bytes), Box::new(rpush))
        .cmd("LPOP", W, &[Bytes], None, Box::new(lpop))
        .cmd("RPOP", W, &[Bytes], None, Box::new(rpop))
        .cmd("LRANGE", R, &[Bytes, Int, Int], None, Box::new(lrange))
        .cmd("LINDEX", R, &[Bytes, Int], None, Box::new(lindex))
        // hash
        .cmd("HSET", W, &[Bytes, Bytes, Bytes], None, Box::new(hset))
        .cmd("HGET", R, &[Bytes, Bytes], None, Box::new(hget))
        .cmd("HDEL", W, &[Bytes], Some(Bytes), Box::new(hdel))
        .cmd("HKEYS", R, &[Bytes], None, Box::new(hkeys))
        .build()
}

fn auth(password: String) -> CommandFn {
    Box::new(move |session: &Session, args: &Args| {
        if session.authenticated() {
            return Ok(Payload::Bool(true));
        }
        let supplied = args.str(0)?;
        if password.is_empty() || supplied == password {
            session.set_authenticated(true);
            Ok(Payload::Bool(true))
        } else {
            Err(CommandError::Forbidden)
        }
    })
}

fn keys(session: &Session, _args: &Args) -> Result<Payload, CommandError> {
    session.storage()?.read(|r| Ok(r.keys().into()))
}

fn del(session: &Session, args: &Args) -> Result<Payload, CommandError> {
    let keys = args.rest_bytes()?;
    session.storage()?.write(|w| {
        let mut counter = 0i64;
        for key in &keys {
            if w.delete(key) {
                counter += 1;
            }
        }
        Ok(Payload::Int(counter))
    })
}

fn ttl(session: &Session, args: &Args) -> Result<Payload, CommandError> {
    let key = args.bytes(0)?;
    session.storage()?.read(|r| Ok(Payload::Int(r.ttl(key))))
}

fn expire(session: &Session, args: &Args) -> Result<Payload, CommandError> {
    let key = args.bytes(0)?;
    let seconds = args.int(1)?;
    session
        .storage()?
        .write(|w| Ok(Payload::Bool(w.set_ttl(key, seconds))))
}

fn set(session: &Session, args: &Args) -> Result<Payload, CommandError> {
    let key = args.bytes(0)?.clone();
    let value = args.bytes(1)?.clone();
    session.storage()?.write(|w| {
        w.set(key, StoredValue::str(value));
        Ok(Payload::Bool(true))
    })
}

fn get(session: &Session, args: &Args) -> Result<Payload, CommandError> {
    let key = args.bytes(0)?;
    session.storage()?.read(|r| match r.get(key) {
        Some(StoredValue::Str(v)) => Ok(Payload::Value(v.clone())),
        Some(_) => Err(CommandError::WrongType),
        None => Ok(Payload::Nil),
    })
}

/// Live list under the key, created on demand; a live entry of another
/// variant is a wrong-type error before anything mutates.
fn list_entry<'a>(w: &'a mut RawStore, key: &Value) -> Result<&'a mut ListObject, CommandError> {
    if w.get(key).is_none() {
        w.set(key.clone(), StoredValue::list());
    }
    match w.get_mut(key) {
        Some(StoredValue::List(list)) => Ok(list),
        _ => Err(CommandError::WrongType),
    }
}

fn hash_entry<'a>(w: &'a mut RawStore, key: &Value) -> Result<&'a mut HashObject, CommandError> {
    if w.get(key).is_none() {
        w.set(key.clone(), StoredValue::hash());
    }
    match w.get_mut(key) {
        Some(StoredValue::Hash(hash)) => Ok(hash),
        _ => Err(CommandError::WrongType),
    }
}

fn push(session: &Session, args: &Args, front: bool) -> Result<Payload, CommandError> {
    let key = args.bytes(0)?.clone();
    let values = args.rest_bytes()?;
    session.storage()?.write(|w| {
        let list = list_entry(w, &key)?;
        let new_len = if front {
            list.lpush(values)
        } else {
            list.rpush(values)
        };
        Ok(Payload::Int(new_len))
    })
}

fn lpush(session: &Session, args: &Args) -> Result<Payload, CommandError> {
    push(session, args, true)
}

fn rpush(session: &Session, args: &Args) -> Result<Payload, CommandError> {
    push(session, args, false)
}

fn pop(session: &Session, args: &Args, front: bool) -> Result<Payload, CommandError> {
    let key = args.bytes(0)?;
    session.storage()?.write(|w| match w.get_mut(key) {
        Some(StoredValue::List(list)) => {
            let popped = if front { list.lpop() } else { list.rpop() };
            // an existing empty list answers with an empty value; nil means
            // the key is absent
            Ok(Payload::Value(popped.unwrap_or_default()))
        }
        Some(_) => Err(CommandError::WrongType),
        None => Ok(Payload::Nil),
    })
}

fn lpop(session: &Session, args: &Args) -> Result<Payload, CommandError> {
    pop(session, args, true)
}

fn rpop(session: &Session, args: &Args) -> Result<Payload, CommandError> {
    pop(session, args, false)
}

fn lrange(session: &Session, args: &Args) -> Result<Payload, CommandError> {
    let key = args.bytes(0)?;
    let start = args.int(1)?;
    let stop = args.int(2)?;
    session.storage()?.read(|r| match r.get(key) {
        Some(StoredValue::List(list)) => Ok(list.range(start, stop).into()),
        Some(_) => Err(CommandError::WrongType),
        None => Ok(Payload::Nil),
    })
}

fn lindex(session: &Session, args: &Args) -> Result<Payload, CommandError> {
    let key = args.bytes(0)?;
    let index = args.int(1)?;
    session.storage()?.read(|r| match r.get(key) {
        Some(StoredValue::List(list)) => Ok(Payload::Value(list.get(index))),
        Some(_) => Err(CommandError::WrongType),
        None => Ok(Payload::Nil),
    })
}

fn hset(session: &Session, args: &Args) -> Result<Payload, CommandError> {
    let key = args.bytes(0)?.clone();
    let field = args.bytes(1)?.clone();
    let value = args.bytes(2)?.clone();
    session.storage()?.write(|w| {
        let hash = hash_entry(w, &key)?;
        Ok(Payload::Bool(hash.set(field, value)))
    })
}

fn hget(session: &Session, args: &Args) -> Result<Payload, CommandError> {
    let key = args.bytes(0)?;
    let field = args.bytes(1)?;
    session.storage()?.read(|r| match r.get(key) {
        Some(StoredValue::Hash(hash)) => Ok(hash.get(field).cloned().into()),
        Some(_) => Err(CommandError::WrongType),
        None => Ok(Payload::Nil),
    })
}

fn hdel(session: &Session, args: &Args) -> Result<Payload, CommandError> {
    let key = args.bytes(0)?;
    let fields = args.rest_bytes()?;
    session.storage()?.write(|w| match w.get_mut(key) {
        Some(StoredValue::Hash(hash)) => Ok(Payload::Int(hash.del(&fields))),
        Some(_) => Err(CommandError::WrongType),
        None => Ok(Payload::Nil),
    })
}

fn hkeys(session: &Session, args: &Args) -> Result<Payload, CommandError> {
    let key = args.bytes(0)?;
    session.storage()?.read(|r| match r.get(key) {
        Some(StoredValue::Hash(hash)) => Ok(hash.keys().into()),
        Some(_) => Err(CommandError::WrongType),
        None => Ok(Payload::Nil),
    })
}
