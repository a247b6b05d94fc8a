// Metamethod lookup and the fallback paths for arithmetic, comparison,
// length and concatenation.

use crate::bytecode::Tm;
use crate::gc::TableId;
use crate::value::Value;
use crate::vm::execute::arith::float_to_lua_string;
use crate::vm::{Control, Vm};

impl Vm {
    /// The metatable of a value, if any.
    pub(crate) fn metatable_of(&self, v: &Value) -> Option<TableId> {
        match v {
            Value::Table(id) => self.pool.table(*id).metatable,
            Value::Userdata(id) => self.pool.userdata[id.0].metatable,
            Value::String(_) => self.string_mt,
            _ => None,
        }
    }

    /// Look up a metamethod on a value; nil fields count as absent.
    pub(crate) fn get_metamethod(&self, v: &Value, tm: Tm) -> Option<Value> {
        let mt = self.metatable_of(v)?;
        let key = Value::String(self.names.tm[tm as usize]);
        let h = self.pool.table(mt).get(&key);
        if h.is_nil() { None } else { Some(h) }
    }

    /// Call a metamethod and keep its first result.
    pub(crate) fn call_metamethod(
        &mut self,
        h: Value,
        args: Vec<Value>,
    ) -> Result<Value, Control> {
        let results = self.call(h, args)?;
        Ok(results.into_iter().next().unwrap_or(Value::Nil))
    }

    /// Binary metamethod dispatch: left operand's handler first, then the
    /// right's; a miss is a typed runtime error.
    pub(crate) fn try_bin_metamethod(
        &mut self,
        tm: Tm,
        a: Value,
        b: Value,
    ) -> Result<Value, Control> {
        let h = self
            .get_metamethod(&a, tm)
            .or_else(|| self.get_metamethod(&b, tm));
        match h {
            Some(h) => self.call_metamethod(h, vec![a, b]),
            None => {
                // Blame the operand that cannot be a number.
                let culprit = if a.is_number() || (tm != Tm::Concat && a.is_string()) {
                    b
                } else {
                    a
                };
                Err(self.rt_error(format!(
                    "attempt to {} a {} value",
                    tm.describe(),
                    culprit.type_name()
                )))
            }
        }
    }

    /// `a < b` with the number/string primitives and the `__lt` fallback.
    pub(crate) fn less_than(&mut self, a: Value, b: Value) -> Result<bool, Control> {
        match (&a, &b) {
            (Value::Integer(x), Value::Integer(y)) => Ok(x < y),
            (Value::Integer(x), Value::Float(y)) => Ok((*x as f64) < *y),
            (Value::Float(x), Value::Integer(y)) => Ok(*x < (*y as f64)),
            (Value::Float(x), Value::Float(y)) => Ok(x < y),
            (Value::String(x), Value::String(y)) => {
                Ok(self.pool.str(*x) < self.pool.str(*y))
            }
            _ => match self
                .get_metamethod(&a, Tm::Lt)
                .or_else(|| self.get_metamethod(&b, Tm::Lt))
            {
                Some(h) => Ok(self.call_metamethod(h, vec![a, b])?.is_truthy()),
                None => Err(self.order_error(&a, &b)),
            },
        }
    }

    /// `a <= b`, with `__le`.
    pub(crate) fn less_equal(&mut self, a: Value, b: Value) -> Result<bool, Control> {
        match (&a, &b) {
            (Value::Integer(x), Value::Integer(y)) => Ok(x <= y),
            (Value::Integer(x), Value::Float(y)) => Ok((*x as f64) <= *y),
            (Value::Float(x), Value::Integer(y)) => Ok(*x <= (*y as f64)),
            (Value::Float(x), Value::Float(y)) => Ok(x <= y),
            (Value::String(x), Value::String(y)) => {
                Ok(self.pool.str(*x) <= self.pool.str(*y))
            }
            _ => match self
                .get_metamethod(&a, Tm::Le)
                .or_else(|| self.get_metamethod(&b, Tm::Le))
            {
                Some(h) => Ok(self.call_metamethod(h, vec![a, b])?.is_truthy()),
                None => Err(self.order_error(&a, &b)),
            },
        }
    }

    fn order_error(&mut self, a: &Value, b: &Value) -> Control {
        let (ta, tb) = (a.type_name(), b.type_name());
        if ta == tb {
            self.rt_error(format!("attempt to compare two {ta} values"))
        } else {
            self.rt_error(format!("attempt to compare {ta} with {tb}"))
        }
    }

    /// Full equality: primitive equality, then `__eq` when both operands are
    /// tables or both are userdata.
    pub(crate) fn values_equal(&mut self, a: Value, b: Value) -> Result<bool, Control> {
        if a.raw_equals(&b) {
            return Ok(true);
        }
        let eligible = matches!(
            (&a, &b),
            (Value::Table(_), Value::Table(_)) | (Value::Userdata(_), Value::Userdata(_))
        );
        if !eligible {
            return Ok(false);
        }
        match self
            .get_metamethod(&a, Tm::Eq)
            .or_else(|| self.get_metamethod(&b, Tm::Eq))
        {
            Some(h) => Ok(self.call_metamethod(h, vec![a, b])?.is_truthy()),
            None => Ok(false),
        }
    }

    /// The length operator with `__len`.
    pub(crate) fn value_length(&mut self, v: Value) -> Result<Value, Control> {
        match v {
            Value::String(id) => Ok(Value::Integer(self.pool.str(id).len() as i64)),
            Value::Table(id) => {
                if let Some(h) = self.get_metamethod(&v, Tm::Len) {
                    return self.call_metamethod(h, vec![v]);
                }
                Ok(Value::Integer(self.pool.table(id).length()))
            }
            _ => match self.get_metamethod(&v, Tm::Len) {
                Some(h) => self.call_metamethod(h, vec![v]),
                None => Err(self.rt_error(format!(
                    "attempt to get length of a {} value",
                    v.type_name()
                ))),
            },
        }
    }

    /// Concatenate `n` stack values starting at `base_idx`, right to left,
    /// with the `__concat` fallback.
    pub(crate) fn concat_values(&mut self, base_idx: usize, n: usize) -> Result<Value, Control> {
        let mut acc = self.exec.get(base_idx + n - 1);
        for i in (0..n.saturating_sub(1)).rev() {
            let left = self.exec.get(base_idx + i);
            acc = self.concat_pair(left, acc)?;
        }
        Ok(acc)
    }

    pub(crate) fn concat_pair(&mut self, a: Value, b: Value) -> Result<Value, Control> {
        if let (Some(sa), Some(sb)) = (self.concat_text(&a), self.concat_text(&b)) {
            let mut s = sa;
            s.push_str(&sb);
            return Ok(self.create_string_owned(s));
        }
        self.try_bin_metamethod(Tm::Concat, a, b)
    }

    /// Strings and numbers coerce in concatenation.
    fn concat_text(&self, v: &Value) -> Option<String> {
        match v {
            Value::String(id) => Some(self.pool.str(*id).to_string()),
            Value::Integer(i) => {
                let mut buf = itoa::Buffer::new();
                Some(buf.format(*i).to_string())
            }
            Value::Float(n) => Some(float_to_lua_string(*n)),
            _ => None,
        }
    }

    /// `tostring` semantics with the `__tostring` metamethod.
    pub(crate) fn tostring_value(&mut self, v: Value) -> Result<String, Control> {
        if let Some(h) = self.get_metamethod(&v, Tm::ToString) {
            let r = self.call_metamethod(h, vec![v])?;
            return Ok(self.display_value(r));
        }
        Ok(self.display_value(v))
    }
}
