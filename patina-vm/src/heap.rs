// patina-vm - Heap and garbage collector
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The garbage-collected heap.
//!
//! Objects live in an arena of slots addressed by [`ObjRef`] handles and are
//! additionally threaded onto an intrusive list through their headers, which
//! the sweep phase walks. Collection is tri-color mark-sweep: roots are
//! marked gray, the gray stack is drained by marking each object's
//! references, unmarked strings are pruned from the weak interning table,
//! and the sweep frees whatever stayed white. A collection is due whenever
//! `bytes_allocated` passes `next_gc`; after a sweep the threshold doubles
//! the live size.
//!
//! The VM decides *when* to collect (at its allocation points, so operands
//! are still rooted on the value stack); the heap never collects on its own.

use crate::object::{
    BoundMethod, Class, Closure, Function, Instance, List, Native, Obj, ObjKind, ObjRef, StrObj,
    Upvalue,
};
use crate::table::Table;
use crate::value::Value;

const GC_INITIAL_THRESHOLD: usize = 1024 * 1024;
const GC_HEAP_GROW_FACTOR: usize = 2;

/// FNV-1a, the interner's string hash.
pub fn hash_string(chars: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in chars.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// The object arena and collector state.
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Option<Obj>>,
    free: Vec<u32>,
    /// Head of the intrusive all-objects list.
    head: Option<ObjRef>,
    bytes_allocated: usize,
    next_gc: usize,
    gray: Vec<ObjRef>,
    /// Interned strings, keyed by themselves. Weak: pruned between mark
    /// and sweep.
    strings: Table,
}

impl Heap {
    pub fn new() -> Heap {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            bytes_allocated: 0,
            next_gc: GC_INITIAL_THRESHOLD,
            gray: Vec::new(),
            strings: Table::new(),
        }
    }

    // ========================================================================
    // Allocation and interning
    // ========================================================================

    /// Allocate a new object, linking it onto the all-objects list.
    pub fn alloc(&mut self, kind: ObjKind) -> ObjRef {
        let obj = Obj {
            marked: false,
            next: self.head,
            kind,
        };
        self.bytes_allocated += obj_size(&obj);
        let obj_ref = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(obj);
                ObjRef::new(index)
            }
            None => {
                self.slots.push(Some(obj));
                ObjRef::new((self.slots.len() - 1) as u32)
            }
        };
        self.head = Some(obj_ref);
        obj_ref
    }

    /// Intern a borrowed string, returning the canonical object.
    pub fn intern(&mut self, chars: &str) -> ObjRef {
        let hash = hash_string(chars);
        if let Some(existing) = self.find_interned(chars, hash) {
            return existing;
        }
        self.new_string(chars.into(), hash)
    }

    /// Intern a string the caller already built, returning the canonical
    /// object and dropping the argument if it was already interned.
    pub fn intern_owned(&mut self, chars: String) -> ObjRef {
        let hash = hash_string(&chars);
        if let Some(existing) = self.find_interned(&chars, hash) {
            return existing;
        }
        self.new_string(chars.into_boxed_str(), hash)
    }

    fn find_interned(&self, chars: &str, hash: u32) -> Option<ObjRef> {
        let slots = &self.slots;
        self.strings.find_string(hash, |candidate| {
            match &slots[candidate.index() as usize] {
                Some(Obj {
                    kind: ObjKind::Str(s),
                    ..
                }) => &*s.chars == chars,
                _ => false,
            }
        })
    }

    fn new_string(&mut self, chars: Box<str>, hash: u32) -> ObjRef {
        let obj_ref = self.alloc(ObjKind::Str(StrObj { chars, hash }));
        self.strings.set(obj_ref, hash, Value::NONE);
        obj_ref
    }

    pub fn alloc_function(&mut self, function: Function) -> ObjRef {
        self.alloc(ObjKind::Function(function))
    }

    pub fn alloc_native(&mut self, native: Native) -> ObjRef {
        self.alloc(ObjKind::Native(native))
    }

    pub fn alloc_closure(&mut self, function: ObjRef) -> ObjRef {
        let upvalue_count = self.function(function).upvalue_count;
        self.alloc(ObjKind::Closure(Closure {
            function,
            upvalues: Vec::with_capacity(upvalue_count),
        }))
    }

    pub fn alloc_upvalue(&mut self, upvalue: Upvalue) -> ObjRef {
        self.alloc(ObjKind::Upvalue(upvalue))
    }

    pub fn alloc_class(&mut self, name: ObjRef) -> ObjRef {
        self.alloc(ObjKind::Class(Class {
            name,
            methods: Table::new(),
        }))
    }

    pub fn alloc_instance(&mut self, class: ObjRef) -> ObjRef {
        self.alloc(ObjKind::Instance(Instance {
            class,
            fields: Table::new(),
        }))
    }

    pub fn alloc_bound_method(&mut self, receiver: Value, method: ObjRef) -> ObjRef {
        self.alloc(ObjKind::BoundMethod(BoundMethod { receiver, method }))
    }

    pub fn alloc_list(&mut self) -> ObjRef {
        self.alloc(ObjKind::List(List::new()))
    }

    /// Append to a list, keeping the element bytes on the allocation books.
    pub fn list_push(&mut self, list: ObjRef, value: Value) {
        self.bytes_allocated += std::mem::size_of::<Value>();
        self.list_mut(list).push(value);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn get(&self, obj_ref: ObjRef) -> &Obj {
        match &self.slots[obj_ref.index() as usize] {
            Some(obj) => obj,
            None => unreachable!("dangling object handle"),
        }
    }

    pub fn get_mut(&mut self, obj_ref: ObjRef) -> &mut Obj {
        match &mut self.slots[obj_ref.index() as usize] {
            Some(obj) => obj,
            None => unreachable!("dangling object handle"),
        }
    }

    pub fn is_string(&self, obj_ref: ObjRef) -> bool {
        matches!(self.get(obj_ref).kind, ObjKind::Str(_))
    }

    /// The characters of a string object.
    pub fn string(&self, obj_ref: ObjRef) -> &str {
        match &self.get(obj_ref).kind {
            ObjKind::Str(s) => &s.chars,
            _ => unreachable!("expected a string object"),
        }
    }

    pub fn string_hash(&self, obj_ref: ObjRef) -> u32 {
        match &self.get(obj_ref).kind {
            ObjKind::Str(s) => s.hash,
            _ => unreachable!("expected a string object"),
        }
    }

    pub fn function(&self, obj_ref: ObjRef) -> &Function {
        match &self.get(obj_ref).kind {
            ObjKind::Function(f) => f,
            _ => unreachable!("expected a function object"),
        }
    }

    pub fn native(&self, obj_ref: ObjRef) -> Native {
        match &self.get(obj_ref).kind {
            ObjKind::Native(n) => *n,
            _ => unreachable!("expected a native object"),
        }
    }

    pub fn closure(&self, obj_ref: ObjRef) -> &Closure {
        match &self.get(obj_ref).kind {
            ObjKind::Closure(c) => c,
            _ => unreachable!("expected a closure object"),
        }
    }

    pub fn closure_mut(&mut self, obj_ref: ObjRef) -> &mut Closure {
        match &mut self.get_mut(obj_ref).kind {
            ObjKind::Closure(c) => c,
            _ => unreachable!("expected a closure object"),
        }
    }

    pub fn upvalue(&self, obj_ref: ObjRef) -> &Upvalue {
        match &self.get(obj_ref).kind {
            ObjKind::Upvalue(u) => u,
            _ => unreachable!("expected an upvalue object"),
        }
    }

    pub fn upvalue_mut(&mut self, obj_ref: ObjRef) -> &mut Upvalue {
        match &mut self.get_mut(obj_ref).kind {
            ObjKind::Upvalue(u) => u,
            _ => unreachable!("expected an upvalue object"),
        }
    }

    pub fn class(&self, obj_ref: ObjRef) -> &Class {
        match &self.get(obj_ref).kind {
            ObjKind::Class(c) => c,
            _ => unreachable!("expected a class object"),
        }
    }

    pub fn class_mut(&mut self, obj_ref: ObjRef) -> &mut Class {
        match &mut self.get_mut(obj_ref).kind {
            ObjKind::Class(c) => c,
            _ => unreachable!("expected a class object"),
        }
    }

    pub fn instance(&self, obj_ref: ObjRef) -> &Instance {
        match &self.get(obj_ref).kind {
            ObjKind::Instance(i) => i,
            _ => unreachable!("expected an instance object"),
        }
    }

    pub fn instance_mut(&mut self, obj_ref: ObjRef) -> &mut Instance {
        match &mut self.get_mut(obj_ref).kind {
            ObjKind::Instance(i) => i,
            _ => unreachable!("expected an instance object"),
        }
    }

    pub fn bound_method(&self, obj_ref: ObjRef) -> &BoundMethod {
        match &self.get(obj_ref).kind {
            ObjKind::BoundMethod(b) => b,
            _ => unreachable!("expected a bound method object"),
        }
    }

    pub fn list(&self, obj_ref: ObjRef) -> &List {
        match &self.get(obj_ref).kind {
            ObjKind::List(l) => l,
            _ => unreachable!("expected a list object"),
        }
    }

    pub fn list_mut(&mut self, obj_ref: ObjRef) -> &mut List {
        match &mut self.get_mut(obj_ref).kind {
            ObjKind::List(l) => l,
            _ => unreachable!("expected a list object"),
        }
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Number of live objects on the heap.
    pub fn object_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// True once enough has been allocated to warrant a collection.
    pub fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    // ========================================================================
    // Collection
    // ========================================================================

    /// Mark a value's object, if it has one.
    pub fn mark_value(&mut self, value: Value) {
        if value.is_obj() {
            self.mark_object(value.as_obj());
        }
    }

    /// Mark an object gray.
    pub fn mark_object(&mut self, obj_ref: ObjRef) {
        let obj = self.get_mut(obj_ref);
        if obj.marked {
            return;
        }
        obj.marked = true;
        self.gray.push(obj_ref);
    }

    /// Mark every key and value of a table. Used for root tables owned by
    /// the VM (globals); tables inside objects are traced instead.
    pub fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(key);
            self.mark_value(value);
        }
    }

    /// Drain the gray stack, blackening each object by marking everything
    /// it references.
    pub fn trace_references(&mut self) {
        while let Some(obj_ref) = self.gray.pop() {
            self.blacken(obj_ref);
        }
    }

    fn blacken(&mut self, obj_ref: ObjRef) {
        let mut child_objs: Vec<ObjRef> = Vec::new();
        let mut child_values: Vec<Value> = Vec::new();

        match &self.get(obj_ref).kind {
            ObjKind::Str(_) | ObjKind::Native(_) => {}
            ObjKind::Function(f) => {
                if let Some(name) = f.name {
                    child_objs.push(name);
                }
                child_values.extend(f.chunk.constants.iter().copied());
            }
            ObjKind::Closure(c) => {
                child_objs.push(c.function);
                child_objs.extend(c.upvalues.iter().copied());
            }
            ObjKind::Upvalue(u) => {
                if let crate::object::UpvalueState::Closed(value) = u.state {
                    child_values.push(value);
                }
            }
            ObjKind::Class(c) => {
                child_objs.push(c.name);
                for (key, value) in c.methods.iter() {
                    child_objs.push(key);
                    child_values.push(value);
                }
            }
            ObjKind::Instance(i) => {
                child_objs.push(i.class);
                for (key, value) in i.fields.iter() {
                    child_objs.push(key);
                    child_values.push(value);
                }
            }
            ObjKind::BoundMethod(b) => {
                child_values.push(b.receiver);
                child_objs.push(b.method);
            }
            ObjKind::List(l) => {
                child_values.extend(l.items.iter().copied());
            }
        }

        for child in child_objs {
            self.mark_object(child);
        }
        for value in child_values {
            self.mark_value(value);
        }
    }

    /// Drop interner entries for strings the mark phase left white. Must
    /// run after marking and before [`Heap::sweep`].
    pub fn prune_strings(&mut self) {
        let Heap { strings, slots, .. } = self;
        strings.retain_keys(|key| {
            slots[key.index() as usize]
                .as_ref()
                .is_some_and(|obj| obj.marked)
        });
    }

    /// Free every unmarked object, clear surviving marks, and recompute the
    /// allocation accounting and the next collection threshold.
    pub fn sweep(&mut self) {
        let mut prev: Option<ObjRef> = None;
        let mut cursor = self.head;
        while let Some(obj_ref) = cursor {
            let index = obj_ref.index() as usize;
            let next = self.slots[index].as_ref().and_then(|obj| obj.next);
            let marked = self.slots[index].as_ref().is_some_and(|obj| obj.marked);
            if marked {
                if let Some(obj) = self.slots[index].as_mut() {
                    obj.marked = false;
                }
                prev = Some(obj_ref);
            } else {
                match prev {
                    Some(p) => self.get_mut(p).next = next,
                    None => self.head = next,
                }
                self.slots[index] = None;
                self.free.push(obj_ref.index());
            }
            cursor = next;
        }

        self.bytes_allocated = self
            .slots
            .iter()
            .flatten()
            .map(obj_size)
            .sum();
        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;
    }
}

impl Default for Heap {
    fn default() -> Heap {
        Heap::new()
    }
}

/// Estimated footprint of an object, counted by the allocator and
/// recomputed exactly at sweep time.
fn obj_size(obj: &Obj) -> usize {
    let payload = match &obj.kind {
        ObjKind::Str(s) => s.chars.len(),
        ObjKind::Function(f) => {
            f.chunk.code.len()
                + f.chunk.lines.len() * std::mem::size_of::<u32>()
                + f.chunk.constants.len() * std::mem::size_of::<Value>()
        }
        ObjKind::Native(_) => 0,
        ObjKind::Closure(c) => c.upvalues.len() * std::mem::size_of::<ObjRef>(),
        ObjKind::Upvalue(_) => 0,
        ObjKind::Class(c) => c.methods.capacity() * table_entry_size(),
        ObjKind::Instance(i) => i.fields.capacity() * table_entry_size(),
        ObjKind::BoundMethod(_) => 0,
        ObjKind::List(l) => l.items.capacity() * std::mem::size_of::<Value>(),
    };
    std::mem::size_of::<Obj>() + payload
}

fn table_entry_size() -> usize {
    std::mem::size_of::<(ObjRef, u32, Value)>()
}

// ============================================================================
// Value formatting
// ============================================================================

impl Heap {
    /// Render a value the way `print` shows it.
    pub fn format_value(&self, value: Value) -> String {
        if value.is_none() {
            "none".to_string()
        } else if value.is_bool() {
            if value.as_bool() { "true" } else { "false" }.to_string()
        } else if value.is_int() {
            value.as_int().to_string()
        } else if value.is_float() {
            format!("{:.6}", value.as_float())
        } else {
            self.format_object(value.as_obj())
        }
    }

    fn format_object(&self, obj_ref: ObjRef) -> String {
        match &self.get(obj_ref).kind {
            ObjKind::Str(s) => s.chars.to_string(),
            ObjKind::Function(f) => match f.name {
                Some(name) => format!("<func {}>", self.string(name)),
                None => "<script>".to_string(),
            },
            ObjKind::Native(_) => "<native func>".to_string(),
            ObjKind::Closure(c) => self.format_object(c.function),
            ObjKind::Upvalue(_) => "upvalue".to_string(),
            ObjKind::Class(c) => self.string(c.name).to_string(),
            ObjKind::Instance(i) => {
                format!("<{} instance>", self.string(self.class(i.class).name))
            }
            ObjKind::BoundMethod(b) => self.format_object(b.method),
            ObjKind::List(l) => {
                let items: Vec<String> =
                    l.items.iter().map(|item| self.format_value(*item)).collect();
                format!("[{}]", items.join(", "))
            }
        }
    }
}
