// Compiled-chunk serialization: `"RLua"` magic, a version byte, then the
// prototype tree. The format is implementation-defined and carries no
// cross-version guarantee.

use std::rc::Rc;

use smol_str::SmolStr;

use crate::bytecode::{Proto, UpvalDesc};
use crate::gc::ObjectPool;
use crate::value::Value;

pub const CHUNK_MAGIC: &[u8; 4] = b"RLua";
pub const CHUNK_VERSION: u8 = 1;

const KTAG_NIL: u8 = 0;
const KTAG_FALSE: u8 = 1;
const KTAG_TRUE: u8 = 2;
const KTAG_INT: u8 = 3;
const KTAG_FLOAT: u8 = 4;
const KTAG_STRING: u8 = 5;

/// True if the byte slice starts with the compiled-chunk magic.
pub fn is_compiled_chunk(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && &bytes[..4] == CHUNK_MAGIC
}

/// Serialize a prototype tree to the binary artifact format.
pub fn dump_chunk(proto: &Proto, pool: &ObjectPool) -> Vec<u8> {
    let mut out = Vec::with_capacity(1024);
    out.extend_from_slice(CHUNK_MAGIC);
    out.push(CHUNK_VERSION);
    write_proto(proto, pool, &mut out);
    out
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    write_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn write_proto(proto: &Proto, pool: &ObjectPool, out: &mut Vec<u8>) {
    write_str(out, &proto.source);
    write_u32(out, proto.line_defined);
    out.push(proto.param_count);
    out.push(proto.is_vararg as u8);
    out.push(proto.max_stack_size);

    write_u32(out, proto.code.len() as u32);
    for &i in &proto.code {
        write_u32(out, i);
    }

    write_u32(out, proto.constants.len() as u32);
    for k in &proto.constants {
        match k {
            Value::Nil => out.push(KTAG_NIL),
            Value::Boolean(false) => out.push(KTAG_FALSE),
            Value::Boolean(true) => out.push(KTAG_TRUE),
            Value::Integer(i) => {
                out.push(KTAG_INT);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Value::Float(n) => {
                out.push(KTAG_FLOAT);
                out.extend_from_slice(&n.to_bits().to_le_bytes());
            }
            Value::String(id) => {
                out.push(KTAG_STRING);
                write_str(out, pool.str(*id));
            }
            // The constant pool only ever holds immediates and strings.
            _ => out.push(KTAG_NIL),
        }
    }

    write_u32(out, proto.upvalues.len() as u32);
    for up in &proto.upvalues {
        write_str(out, &up.name);
        out.push(up.in_stack as u8);
        out.push(up.index);
    }

    write_u32(out, proto.protos.len() as u32);
    for child in &proto.protos {
        write_proto(child, pool, out);
    }

    write_u32(out, proto.locals.len() as u32);
    for name in &proto.locals {
        write_str(out, name);
    }

    write_u32(out, proto.line_info.len() as u32);
    for &line in &proto.line_info {
        write_u32(out, line);
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        if self.pos + n > self.bytes.len() {
            return Err("truncated chunk".to_string());
        }
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> Result<i64, String> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn u64(&mut self) -> Result<u64, String> {
        Ok(self.i64()? as u64)
    }

    fn str(&mut self) -> Result<String, String> {
        let len = self.u32()? as usize;
        let b = self.take(len)?;
        String::from_utf8(b.to_vec()).map_err(|_| "invalid string in chunk".to_string())
    }
}

/// Deserialize a binary chunk. String constants are interned through the
/// given pool, so the result is ready for execution on that VM.
pub fn load_chunk(bytes: &[u8], pool: &mut ObjectPool) -> Result<Proto, String> {
    if !is_compiled_chunk(bytes) {
        return Err("not a compiled chunk (bad magic)".to_string());
    }
    if bytes[4] != CHUNK_VERSION {
        return Err(format!("unsupported chunk version {}", bytes[4]));
    }
    let mut r = Reader { bytes, pos: 5 };
    let proto = read_proto(&mut r, pool)?;
    if r.pos != bytes.len() {
        return Err("trailing bytes after chunk".to_string());
    }
    Ok(proto)
}

fn read_proto(r: &mut Reader, pool: &mut ObjectPool) -> Result<Proto, String> {
    let source = SmolStr::new(r.str()?);
    let mut proto = Proto::new(source);
    proto.line_defined = r.u32()?;
    proto.param_count = r.u8()?;
    proto.is_vararg = r.u8()? != 0;
    proto.max_stack_size = r.u8()?;

    let ncode = r.u32()? as usize;
    proto.code.reserve(ncode);
    for _ in 0..ncode {
        proto.code.push(r.u32()?);
    }

    let nk = r.u32()? as usize;
    proto.constants.reserve(nk);
    for _ in 0..nk {
        let k = match r.u8()? {
            KTAG_NIL => Value::Nil,
            KTAG_FALSE => Value::Boolean(false),
            KTAG_TRUE => Value::Boolean(true),
            KTAG_INT => Value::Integer(r.i64()?),
            KTAG_FLOAT => Value::Float(f64::from_bits(r.u64()?)),
            KTAG_STRING => {
                let s = r.str()?;
                Value::String(pool.intern_owned(s))
            }
            tag => return Err(format!("bad constant tag {tag}")),
        };
        proto.constants.push(k);
    }

    let nup = r.u32()? as usize;
    for _ in 0..nup {
        let name = SmolStr::new(r.str()?);
        let in_stack = r.u8()? != 0;
        let index = r.u8()?;
        proto.upvalues.push(UpvalDesc {
            name,
            in_stack,
            index,
        });
    }

    let nprotos = r.u32()? as usize;
    for _ in 0..nprotos {
        proto.protos.push(Rc::new(read_proto(r, pool)?));
    }

    let nlocals = r.u32()? as usize;
    for _ in 0..nlocals {
        proto.locals.push(SmolStr::new(r.str()?));
    }

    let nlines = r.u32()? as usize;
    for _ in 0..nlines {
        proto.line_info.push(r.u32()?);
    }

    Ok(proto)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Instruction, OpCode};

    #[test]
    fn test_chunk_roundtrip() {
        let mut pool = ObjectPool::new();
        let hello = pool.intern("hello");
        let mut proto = Proto::new(SmolStr::new("t"));
        proto.code = vec![
            Instruction::abx(OpCode::LoadK, 0, 0),
            Instruction::abc(OpCode::Return1, 0, 2, 0),
        ];
        proto.constants = vec![
            Value::String(hello),
            Value::Integer(-7),
            Value::Float(0.5),
            Value::Boolean(true),
            Value::Nil,
        ];
        proto.line_info = vec![1, 1];
        proto.max_stack_size = 2;

        let bytes = dump_chunk(&proto, &pool);
        assert!(is_compiled_chunk(&bytes));

        let loaded = load_chunk(&bytes, &mut pool).unwrap();
        assert_eq!(loaded.code, proto.code);
        assert_eq!(loaded.constants.len(), proto.constants.len());
        assert!(loaded.constants[0].raw_equals(&Value::String(hello)));
        assert!(loaded.constants[1].raw_equals(&Value::Integer(-7)));
        assert!(loaded.constants[2].raw_equals(&Value::Float(0.5)));
        assert_eq!(loaded.max_stack_size, 2);
        assert_eq!(loaded.source.as_str(), "t");
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut pool = ObjectPool::new();
        assert!(load_chunk(b"nope", &mut pool).is_err());
    }

    #[test]
    fn test_rejects_truncated() {
        let mut pool = ObjectPool::new();
        let proto = Proto::new(SmolStr::new("t"));
        let bytes = dump_chunk(&proto, &pool);
        assert!(load_chunk(&bytes[..bytes.len() - 2], &mut pool).is_err());
    }
}
