//! Runtime scope frames.
//!
//! Frames live in an arena and refer to their enclosing frame by [`FrameId`].
//! Closures hold the id of the frame they were declared in, so a closure and
//! the code that created it see each other's writes.
//!
//! A frame nothing captured goes back to the free list as soon as its block or
//! call exits. Once a closure is declared in a frame, that frame and its
//! ancestors are marked captured and are only reclaimed by [`Environments::collect`]:
//! a mark-and-sweep over the arena that runs when enough captured frames have
//! piled up. Its roots are the frames still executing, plus the closure frames
//! of callables that something outside the arena still holds. An `Rc` with
//! more strong references than arena slots holding it counts as held from
//! outside. Closures that only reach each other (a function stored in the
//! frame it closes over) are freed together. Every closure also clones its
//! frame's [`FramePin`], which counts the closures that exist anywhere, so one
//! held only by running code is still seen.

use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::error::RuntimeError;
use crate::token::Token;
use crate::value::{Callable, Value};

/// Captured frames tolerated before the first collection.
const MIN_COLLECTION_THRESHOLD: usize = 256;

/// Stable handle to a frame in [`Environments`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

/// Token a closure holds for the frame it closes over.
#[derive(Debug, Clone, Default)]
pub struct FramePin(Rc<()>);

#[derive(Debug)]
struct Frame {
    values: HashMap<String, Value>,
    enclosing: Option<FrameId>,
    captured: bool,
    active: bool,
    pin: FramePin,
}

impl Frame {
    fn new(enclosing: Option<FrameId>) -> Self {
        Frame {
            values: HashMap::new(),
            enclosing,
            captured: false,
            active: true,
            pin: FramePin::default(),
        }
    }

    /// Closures over this frame, wherever they are held.
    fn closures(&self) -> usize {
        Rc::strong_count(&self.pin.0) - 1
    }

    fn callables(&self) -> impl Iterator<Item = &Rc<dyn Callable>> {
        self.values.values().filter_map(Value::as_callable)
    }
}

#[derive(Debug)]
pub struct Environments {
    frames: Vec<Option<Frame>>,
    free: Vec<usize>,
    next_collection: usize,
}

impl Default for Environments {
    fn default() -> Self {
        Self::new()
    }
}

fn undefined(name: &Token) -> RuntimeError {
    RuntimeError::new(name, format!("Undefined variable '{}'.", name.lexeme))
}

fn callable_key(callable: &Rc<dyn Callable>) -> *const () {
    Rc::as_ptr(callable) as *const ()
}

impl Environments {
    /// Arena holding just the global frame.
    pub fn new() -> Self {
        let mut global = Frame::new(None);
        global.captured = true;

        Environments {
            frames: vec![Some(global)],
            free: Vec::new(),
            next_collection: MIN_COLLECTION_THRESHOLD,
        }
    }

    pub fn globals(&self) -> FrameId {
        FrameId(0)
    }

    /// Number of frames currently alive.
    pub fn live(&self) -> usize {
        self.frames.len() - self.free.len()
    }

    /// Allocate a child frame of `enclosing`.
    pub fn push(&mut self, enclosing: FrameId) -> FrameId {
        let frame = Frame::new(Some(enclosing));

        match self.free.pop() {
            Some(index) => {
                self.frames[index] = Some(frame);
                FrameId(index)
            }
            None => {
                self.frames.push(Some(frame));
                FrameId(self.frames.len() - 1)
            }
        }
    }

    /// The block or call that owns `id` has exited. Uncaptured frames are
    /// freed at once; captured ones wait for the next collection.
    pub fn release(&mut self, id: FrameId) {
        if id == self.globals() {
            return;
        }

        let Some(frame) = self.frame_mut(id) else {
            return;
        };
        frame.active = false;

        if !frame.captured {
            self.frames[id.0] = None;
            self.free.push(id.0);
        } else if self.live() >= self.next_collection {
            self.collect();
        }
    }

    /// Mark `id` and every frame it encloses into as captured, and hand out
    /// the pin a new closure over `id` must hold.
    pub fn capture(&mut self, id: FrameId) -> FramePin {
        let pin = self
            .frame(id)
            .map(|frame| frame.pin.clone())
            .unwrap_or_default();
        let mut next = Some(id);

        while let Some(current) = next {
            match self.frame_mut(current) {
                Some(frame) if !frame.captured => {
                    frame.captured = true;
                    next = frame.enclosing;
                }
                _ => break,
            }
        }

        debug!("Captured frame {:?}", id);
        pin
    }

    /// Free every frame that neither running code nor an outside reference to
    /// a closure can reach. Returns how many frames were freed.
    pub fn collect(&mut self) -> usize {
        let mut pending = self.roots();

        let mut marked = vec![false; self.frames.len()];
        while let Some(id) = pending.pop() {
            let Some(frame) = self.frame(id) else {
                continue;
            };
            if std::mem::replace(&mut marked[id.0], true) {
                continue;
            }

            pending.extend(frame.enclosing);
            pending.extend(frame.callables().filter_map(|c| c.closure()));
        }

        let garbage: Vec<usize> = self
            .frames
            .iter()
            .enumerate()
            .filter(|(index, slot)| slot.is_some() && !marked[*index])
            .map(|(index, _)| index)
            .collect();

        // Dropped only after every slot is cleared: freed frames may hold the
        // last references to one another's closures.
        let mut dropped = Vec::with_capacity(garbage.len());
        for &index in &garbage {
            dropped.push(self.frames[index].take());
            self.free.push(index);
        }
        drop(dropped);

        self.next_collection = MIN_COLLECTION_THRESHOLD.max(2 * self.live());
        debug!(
            "Collected {} frame(s), {} live, next collection at {}",
            garbage.len(),
            self.live(),
            self.next_collection
        );

        garbage.len()
    }

/// Insert or overwrite `name` in `id` only.
    pub fn define(&mut self, id: FrameId, name: &str, value: Value) {
        if let Some(frame) = self.frame_mut(id) {
            frame.values.insert(name.to_string(), value);
        }
    }

    /// Look `name` up starting at `id` and walking outward.
    pub fn get(&self, id: FrameId, name: &Token) -> Result<Value, RuntimeError> {
        let mut next = Some(id);

        while let Some(frame) = next.and_then(|current| self.frame(current)) {
            if let Some(value) = frame.values.get(&name.lexeme) {
                return Ok(value.clone());
            }
            next = frame.enclosing;
        }

        Err(undefined(name))
    }

    /// Overwrite the nearest existing binding of `name`.
    pub fn assign(
        &mut self,
        id: FrameId,
        name: &Token,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let mut next = Some(id);

        while let Some(current) = next {
            let Some(frame) = self.frame_mut(current) else {
                break;
            };

            if let Some(slot) = frame.values.get_mut(&name.lexeme) {
                *slot = value;
                return Ok(());
            }
            next = frame.enclosing;
        }

        Err(undefined(name))
    }

    /// Read `name` from exactly `distance` frames out.
    pub fn get_at(
        &self,
        id: FrameId,
        distance: usize,
        name: &Token,
    ) -> Result<Value, RuntimeError> {
        self.ancestor(id, distance)
            .and_then(|target| self.frame(target))
            .and_then(|frame| frame.values.get(&name.lexeme))
            .cloned()
            .ok_or_else(|| undefined(name))
    }

    /// Write `name` in exactly `distance` frames out.
    pub fn assign_at(
        &mut self,
        id: FrameId,
        distance: usize,
        name: &Token,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let target = self.ancestor(id, distance).ok_or_else(|| undefined(name))?;
        let frame = self.frame_mut(target).ok_or_else(|| undefined(name))?;

        frame.values.insert(name.lexeme.clone(), value);
        Ok(())
    }

    /// Frames that must survive a collection regardless of what reaches them.
    fn roots(&self) -> Vec<FrameId> {
        // Arena slots holding each callable, and the frame it closes over.
        let mut held: HashMap<*const (), (usize, &Rc<dyn Callable>)> = HashMap::new();
        for frame in self.frames.iter().flatten() {
            for callable in frame.callables() {
                held.entry(callable_key(callable))
                    .or_insert((0, callable))
                    .0 += 1;
            }
        }

        // A closure is held from outside when it has more strong references
        // than slots, or when its frame has more pins than closures in slots.
        let mut in_arena: HashMap<FrameId, usize> = HashMap::new();
        let mut pending: Vec<FrameId> = Vec::new();
        for (slots, callable) in held.values() {
            let Some(closure) = callable.closure() else {
                continue;
            };
            *in_arena.entry(closure).or_default() += 1;
            if Rc::strong_count(*callable) > *slots {
                pending.push(closure);
            }
        }
        pending.extend(self.frames.iter().enumerate().filter_map(|(index, slot)| {
            let frame = slot.as_ref()?;
            let id = FrameId(index);
            (frame.closures() > in_arena.get(&id).copied().unwrap_or(0)).then_some(id)
        }));
        pending.extend(
            self.frames
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.as_ref().is_some_and(|frame| frame.active))
                .map(|(index, _)| FrameId(index)),
        );
        pending.push(self.globals());
        pending
    }

    fn ancestor(&self, id: FrameId, distance: usize) -> Option<FrameId> {
        let mut current = id;
        for _ in 0..distance {
            current = self.frame(current)?.enclosing?;
        }
        Some(current)
    }

    fn frame(&self, id: FrameId) -> Option<&Frame> {
        self.frames.get(id.0).and_then(Option::as_ref)
    }

    fn frame_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        self.frames.get_mut(id.0).and_then(Option::as_mut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stmt::FunctionDecl;
    use crate::token::TokenType;
    use crate::value::LoxFunction;

    fn ident(name: &str) -> Token {
        Token::new(TokenType::IDENTIFIER, name, None, 1)
    }

    fn closure_over(frame: FrameId, pin: FramePin) -> Value {
        let declaration = Rc::new(FunctionDecl {
            name: ident("f"),
            params: Vec::new(),
            body: Vec::new(),
        });
        Value::Callable(Rc::new(LoxFunction {
            declaration,
            closure: frame,
            pin,
        }))
    }

    /// A call frame that declared a function, as `fun make() { fun f() {} }`
    /// leaves behind.
    fn exited_call_with_closure(envs: &mut Environments) -> (FrameId, Value) {
        let globals = envs.globals();
        let call = envs.push(globals);
        let pin = envs.capture(call);
        let function = closure_over(call, pin);
        envs.define(call, "f", function.clone());
        envs.release(call);
        (call, function)
    }

    #[test]
    fn lookup_walks_outward_and_define_shadows() {
        let mut envs = Environments::new();
        let globals = envs.globals();
        envs.define(globals, "a", Value::Number(1.0));

        let inner = envs.push(globals);
        assert_eq!(envs.get(inner, &ident("a")), Ok(Value::Number(1.0)));

        envs.define(inner, "a", Value::Number(2.0));
        assert_eq!(envs.get(inner, &ident("a")), Ok(Value::Number(2.0)));
        assert_eq!(envs.get(globals, &ident("a")), Ok(Value::Number(1.0)));
    }

    #[test]
    fn distance_access_skips_intermediate_shadowing() {
        let mut envs = Environments::new();
        let globals = envs.globals();
        let outer = envs.push(globals);
        envs.define(outer, "x", Value::String("outer".into()));
        let middle = envs.push(outer);
        envs.define(middle, "x", Value::String("middle".into()));
        let inner = envs.push(middle);

        assert_eq!(
            envs.get_at(inner, 2, &ident("x")),
            Ok(Value::String("outer".into()))
        );

        envs.assign_at(inner, 2, &ident("x"), Value::Bool(true))
            .expect("outer frame holds x");
        assert_eq!(envs.get(outer, &ident("x")), Ok(Value::Bool(true)));
        assert_eq!(
            envs.get(middle, &ident("x")),
            Ok(Value::String("middle".into()))
        );
    }

    #[test]
    fn undefined_variable_reports_name_and_line() {
        let mut envs = Environments::new();
        let globals = envs.globals();

        let err = envs.get(globals, &ident("nope")).unwrap_err();
        assert_eq!(err.message, "Undefined variable 'nope'.");
        assert_eq!(err.line, 1);

        assert!(envs.assign(globals, &ident("nope"), Value::Nil).is_err());
    }

    #[test]
    fn released_frames_are_reused_unless_captured() {
        let mut envs = Environments::new();
        let globals = envs.globals();

        let first = envs.push(globals);
        envs.release(first);
        assert_eq!(envs.live(), 1);
        assert_eq!(envs.push(globals), first);

        let outer = envs.push(globals);
        let inner = envs.push(outer);
        envs.capture(inner);
        envs.release(inner);
        envs.release(outer);
        assert!(envs.get(inner, &ident("missing")).is_err());
        assert_eq!(envs.live(), 4);
    }

    #[test]
    fn globals_are_never_released() {
        let mut envs = Environments::new();
        let globals = envs.globals();
        envs.define(globals, "g", Value::Nil);
        envs.release(globals);

        assert_eq!(envs.get(globals, &ident("g")), Ok(Value::Nil));
    }

    #[test]
    fn collect_frees_closures_that_only_reach_themselves() {
        let mut envs = Environments::new();
        let (call, function) = exited_call_with_closure(&mut envs);
        drop(function);

        assert_eq!(envs.live(), 2);
        assert_eq!(envs.collect(), 1);
        assert_eq!(envs.live(), 1);
        assert!(envs.get(call, &ident("f")).is_err());
    }

    #[test]
    fn collect_keeps_frames_of_closures_held_outside() {
        let mut envs = Environments::new();
        let (call, function) = exited_call_with_closure(&mut envs);

        assert_eq!(envs.collect(), 0);
        assert_eq!(envs.get(call, &ident("f")), Ok(function.clone()));

        drop(function);
        assert_eq!(envs.collect(), 1);
    }

    #[test]
    fn collect_keeps_frames_of_closures_no_frame_holds() {
        let mut envs = Environments::new();
        let globals = envs.globals();
        let call = envs.push(globals);
        let pin = envs.capture(call);
        envs.define(call, "x", Value::Number(1.0));
        let function = closure_over(call, pin);
        envs.release(call);

        assert_eq!(envs.collect(), 0);
        assert_eq!(envs.get(call, &ident("x")), Ok(Value::Number(1.0)));

        drop(function);
        assert_eq!(envs.collect(), 1);
    }

    #[test]
    fn collect_keeps_closures_reachable_from_globals() {
        let mut envs = Environments::new();
        let globals = envs.globals();
        let (call, function) = exited_call_with_closure(&mut envs);
        envs.define(globals, "keep", function);

        assert_eq!(envs.collect(), 0);
        assert!(envs.get(call, &ident("f")).is_ok());
    }

    #[test]
    fn collect_keeps_running_frames_and_their_ancestors() {
        let mut envs = Environments::new();
        let globals = envs.globals();
        let outer = envs.push(globals);
        envs.capture(outer);
        let inner = envs.push(outer);
        envs.define(outer, "x", Value::Number(1.0));

        assert_eq!(envs.collect(), 0);
        assert_eq!(envs.get(inner, &ident("x")), Ok(Value::Number(1.0)));
    }

    #[test]
    fn captured_frames_stay_bounded_under_churn() {
        let mut envs = Environments::new();
        for _ in 0..10_000 {
            exited_call_with_closure(&mut envs);
        }

        assert!(envs.live() <= 2 * MIN_COLLECTION_THRESHOLD, "{} frames live", envs.live());
    }
}
