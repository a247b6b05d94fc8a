// Table indexing with the __index/__newindex chains. The chain length is
// bounded; exceeding it reports a metamethod loop.

use crate::bytecode::Tm;
use crate::value::Value;
use crate::vm::{Control, Vm};

impl Vm {
    /// `t[k]` honoring `__index` (function or table chain).
    pub(crate) fn index_get(&mut self, t: Value, k: Value) -> Result<Value, Control> {
        let mut t = t;
        for _ in 0..self.config.index_chain_limit {
            if let Value::Table(id) = t {
                let v = self.pool.table(id).get(&k);
                if !v.is_nil() {
                    return Ok(v);
                }
                let Some(h) = self.get_metamethod(&t, Tm::Index) else {
                    return Ok(Value::Nil);
                };
                if h.is_function() {
                    return self.call_metamethod(h, vec![t, k]);
                }
                t = h;
            } else {
                let Some(h) = self.get_metamethod(&t, Tm::Index) else {
                    return Err(self.rt_error(format!(
                        "attempt to index a {} value",
                        t.type_name()
                    )));
                };
                if h.is_function() {
                    return self.call_metamethod(h, vec![t, k]);
                }
                t = h;
            }
        }
        Err(self.rt_error("'__index' chain too long; possible loop"))
    }

    /// `t[k] = v` honoring `__newindex`.
    pub(crate) fn index_set(&mut self, t: Value, k: Value, v: Value) -> Result<(), Control> {
        let mut t = t;
        for _ in 0..self.config.index_chain_limit {
            if let Value::Table(id) = t {
                let existing = self.pool.table(id).get(&k);
                let h = if existing.is_nil() {
                    self.get_metamethod(&t, Tm::NewIndex)
                } else {
                    None
                };
                match h {
                    None => {
                        return self
                            .pool
                            .table_mut(id)
                            .set(k, v)
                            .map_err(|e| self.rt_error(e.message()));
                    }
                    Some(h) if h.is_function() => {
                        self.call(h, vec![t, k, v])?;
                        return Ok(());
                    }
                    Some(h) => t = h,
                }
            } else {
                let Some(h) = self.get_metamethod(&t, Tm::NewIndex) else {
                    return Err(self.rt_error(format!(
                        "attempt to index a {} value",
                        t.type_name()
                    )));
                };
                if h.is_function() {
                    self.call(h, vec![t, k, v])?;
                    return Ok(());
                }
                t = h;
            }
        }
        Err(self.rt_error("'__newindex' chain too long; possible loop"))
    }
}
