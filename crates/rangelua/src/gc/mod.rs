// Stop-the-world mark-and-sweep collector.
//
// The root set is: the global and registry tables, the currently executing
// thread state (stack, frames, open upvalues), the resume chain, every live
// compiled prototype's constants, the interned metamethod names and the
// pending error value. Suspended coroutines are reachable only through their
// thread values. Collection runs only between VM instructions, triggered by
// allocation debt or an explicit request.

mod object_pool;

pub use object_pool::*;

use std::rc::Rc;

use crate::bytecode::Proto;
use crate::value::Value;
use crate::vm::Vm;
use crate::vm::state::ThreadState;

/// Collection is not attempted until this many bytes are live.
const MIN_THRESHOLD: usize = 64 * 1024;

pub struct Gc {
    pub threshold: usize,
    pub enabled: bool,
    pub cycles: usize,
    pub objects_collected: usize,
}

impl Gc {
    pub fn new() -> Self {
        Gc {
            threshold: MIN_THRESHOLD,
            enabled: true,
            cycles: 0,
            objects_collected: 0,
        }
    }

    /// Checked between instructions; never mid-instruction.
    #[inline(always)]
    pub fn should_collect(&self, pool: &ObjectPool) -> bool {
        self.enabled && pool.allocated_bytes >= self.threshold
    }

    fn finish_cycle(&mut self, live_bytes: usize, freed: usize) {
        self.cycles += 1;
        self.objects_collected += freed;
        self.threshold = (live_bytes * 2).max(MIN_THRESHOLD);
    }
}

impl Default for Gc {
    fn default() -> Self {
        Self::new()
    }
}

struct Marker {
    values: Vec<Value>,
    upvalues: Vec<UpvalueId>,
}

impl Marker {
    fn new() -> Self {
        Marker {
            values: Vec::with_capacity(128),
            upvalues: Vec::new(),
        }
    }

    #[inline]
    fn push(&mut self, v: Value) {
        if v.is_collectable() {
            self.values.push(v);
        }
    }

    fn push_thread_state(&mut self, state: &ThreadState) {
        let limit = state.mark_limit().min(state.stack.len());
        for v in &state.stack[..limit] {
            self.push(*v);
        }
        for frame in &state.frames {
            self.push(frame.func);
        }
        for open in &state.open_upvalues {
            self.upvalues.push(open.id);
        }
    }
}

/// Run a full collection cycle.
pub(crate) fn collect(vm: &mut Vm) {
    let mut marker = Marker::new();

    // ---- roots ----
    marker.push(Value::Table(vm.globals));
    marker.push(Value::Table(vm.registry));
    marker.push(vm.last_error);
    for id in vm.names.all() {
        vm.pool.strings[id.0].header.marked = true;
    }
    marker.push_thread_state(&vm.exec);
    marker.push(Value::Thread(vm.main_thread));
    for tid in &vm.resume_chain {
        marker.push(Value::Thread(*tid));
    }
    // Constants of every live prototype (compiled chunks may not be
    // instantiated yet; closures share these trees via Rc).
    vm.protos.retain(|weak| weak.upgrade().is_some());
    let live_protos: Vec<Rc<Proto>> =
        vm.protos.iter().filter_map(|w| w.upgrade()).collect();
    for proto in &live_protos {
        mark_proto_tree(proto, &mut marker);
    }

    // ---- mark ----
    loop {
        if let Some(v) = marker.values.pop() {
            mark_value(&mut vm.pool, v, &mut marker);
        } else if let Some(id) = marker.upvalues.pop() {
            mark_upvalue(&mut vm.pool, id, &mut marker);
        } else {
            break;
        }
    }

    // ---- sweep ----
    let mut freed = 0usize;
    let mut live_bytes = 0usize;

    for id in vm.pool.strings.live_ids() {
        if vm.pool.strings[id].header.marked {
            vm.pool.strings[id].header.marked = false;
            live_bytes += std::mem::size_of::<GcString>() + vm.pool.strings[id].data.len() * 2;
        } else if let Some(dead) = vm.pool.strings.free(id) {
            vm.pool.forget_interned(&dead.data);
            freed += 1;
        }
    }
    for id in vm.pool.tables.live_ids() {
        if vm.pool.tables[id].header.marked {
            vm.pool.tables[id].header.marked = false;
            live_bytes += vm.pool.tables[id].data.footprint();
        } else {
            vm.pool.tables.free(id);
            freed += 1;
        }
    }
    for id in vm.pool.closures.live_ids() {
        if vm.pool.closures[id].header.marked {
            vm.pool.closures[id].header.marked = false;
            live_bytes += std::mem::size_of::<GcClosure>()
                + vm.pool.closures[id].upvalues.len() * std::mem::size_of::<UpvalueId>();
        } else {
            vm.pool.closures.free(id);
            freed += 1;
        }
    }
    for id in vm.pool.upvalues.live_ids() {
        if vm.pool.upvalues[id].header.marked {
            vm.pool.upvalues[id].header.marked = false;
            live_bytes += std::mem::size_of::<GcUpvalue>();
        } else {
            vm.pool.upvalues.free(id);
            freed += 1;
        }
    }
    for id in vm.pool.userdata.live_ids() {
        if vm.pool.userdata[id].header.marked {
            vm.pool.userdata[id].header.marked = false;
            live_bytes += std::mem::size_of::<GcUserdata>();
        } else {
            vm.pool.userdata.free(id);
            freed += 1;
        }
    }
    for id in vm.pool.threads.live_ids() {
        if vm.pool.threads[id].header.marked {
            vm.pool.threads[id].header.marked = false;
            live_bytes += std::mem::size_of::<GcThread>()
                + vm.pool.threads[id]
                    .state
                    .as_ref()
                    .map(|s| s.footprint())
                    .unwrap_or(0);
        } else {
            vm.pool.threads.free(id);
            freed += 1;
        }
    }

    vm.pool.allocated_bytes = live_bytes;
    vm.gc.finish_cycle(live_bytes, freed);
    tracing::debug!(
        freed,
        live_bytes,
        threshold = vm.gc.threshold,
        "gc cycle complete"
    );
}

fn mark_proto_tree(proto: &Proto, marker: &mut Marker) {
    for k in &proto.constants {
        marker.push(*k);
    }
    for child in &proto.protos {
        mark_proto_tree(child, marker);
    }
}

fn mark_value(pool: &mut ObjectPool, v: Value, marker: &mut Marker) {
    match v {
        Value::String(id) => {
            pool.strings[id.0].header.marked = true;
        }
        Value::Table(id) => {
            let obj = &mut pool.tables[id.0];
            if obj.header.marked {
                return;
            }
            obj.header.marked = true;
            if let Some(mt) = obj.data.metatable {
                marker.values.push(Value::Table(mt));
            }
            let children: Vec<Value> = obj
                .data
                .iter_all()
                .flat_map(|(k, v)| [k, v])
                .filter(|v| v.is_collectable())
                .collect();
            marker.values.extend(children);
        }
        Value::Function(id) => {
            let obj = &mut pool.closures[id.0];
            if obj.header.marked {
                return;
            }
            obj.header.marked = true;
            marker.upvalues.extend(obj.upvalues.iter().copied());
            // Constants are covered by the prototype registry walk; nothing
            // more to do here.
        }
        Value::Userdata(id) => {
            let obj = &mut pool.userdata[id.0];
            if obj.header.marked {
                return;
            }
            obj.header.marked = true;
            if let Some(mt) = obj.metatable {
                marker.values.push(Value::Table(mt));
            }
            let uv = obj.user_value;
            marker.push(uv);
        }
        Value::Thread(id) => {
            let obj = &mut pool.threads[id.0];
            if obj.header.marked {
                return;
            }
            obj.header.marked = true;
            let entry = obj.entry;
            let mut stashed: Vec<Value> = Vec::new();
            let mut stashed_upv: Vec<UpvalueId> = Vec::new();
            if let Some(state) = obj.state.as_ref() {
                let limit = state.mark_limit().min(state.stack.len());
                stashed.extend(state.stack[..limit].iter().copied());
                stashed.extend(state.frames.iter().map(|f| f.func));
                stashed_upv.extend(state.open_upvalues.iter().map(|o| o.id));
            }
            marker.push(entry);
            for v in stashed {
                marker.push(v);
            }
            marker.upvalues.extend(stashed_upv);
        }
        _ => {}
    }
}

fn mark_upvalue(pool: &mut ObjectPool, id: UpvalueId, marker: &mut Marker) {
    let obj = &mut pool.upvalues[id.0];
    if obj.header.marked {
        return;
    }
    obj.header.marked = true;
    match obj.state {
        // Open cells point into some live stack, which the root walk already
        // covers.
        UpvalueState::Open { .. } => {}
        UpvalueState::Closed(v) => marker.push(v),
    }
}
