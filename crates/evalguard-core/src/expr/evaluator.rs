//! Tree-walking evaluator.
//!
//! Every name resolves through the [`EvaluationContext`]; there is no way to
//! name a type, load code or reach an object that no binding exposes. The
//! interrupt flag is polled before every node and every collection element,
//! so a timed-out evaluation stops at its next step.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::context::EvaluationContext;
use crate::sandbox::capability::is_denied_member;

use super::ast::{BinaryOp, CollectionOp, Expr, Literal, UnaryOp};
use super::builtins::{builtin_property, call_builtin, index_list, map_key, MapEntry};
use super::error::{EvalError, EvalErrorKind};
use super::value::{read_map, Value};
use super::CompiledExpression;

/// Resource bounds applied while evaluating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalLimits {
    /// Longest string (in characters) an expression may produce.
    pub max_string_len: usize,
    /// Most elements in any single list or map an expression produces.
    pub max_collection_len: usize,
    /// Elements produced across all collections in one evaluation.
    pub max_total_elements: usize,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self {
            max_string_len: 65_536,
            max_collection_len: 100_000,
            max_total_elements: 1_000_000,
        }
    }
}

/// Evaluate `compiled` against `context` with default limits and no deadline.
pub fn evaluate(
    compiled: &CompiledExpression,
    context: &EvaluationContext,
) -> Result<Value, EvalError> {
    let interrupt = AtomicBool::new(false);
    Evaluator::new(context, &interrupt).evaluate(compiled)
}

/// Evaluates compiled expressions against one context.
pub struct Evaluator<'a> {
    context: &'a EvaluationContext,
    interrupt: &'a AtomicBool,
    limits: EvalLimits,
    /// Collection elements produced so far.
    produced: usize,
    /// `#this` stack for nested collection operators.
    scope: Vec<Value>,
}

impl<'a> Evaluator<'a> {
    pub fn new(context: &'a EvaluationContext, interrupt: &'a AtomicBool) -> Self {
        Self {
            context,
            interrupt,
            limits: EvalLimits::default(),
            produced: 0,
            scope: Vec::new(),
        }
    }

    pub fn with_limits(mut self, limits: EvalLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn evaluate(&mut self, compiled: &CompiledExpression) -> Result<Value, EvalError> {
        self.scope.clear();
        self.produced = 0;
        self.eval(compiled.ast())
    }

    fn check_interrupt(&self) -> Result<(), EvalError> {
        if self.interrupt.load(Ordering::Relaxed) {
            return Err(EvalError::interrupted());
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        self.check_interrupt()?;
        match expr {
            Expr::Literal(literal) => Ok(literal_value(literal)),
            Expr::Binding(name) => self.resolve(name),
            Expr::This => self.scope.last().cloned().ok_or_else(|| {
                EvalError::new(
                    EvalErrorKind::UnknownBinding,
                    "#this is only defined inside a collection operator",
                )
            }),
            Expr::List(items) => {
                self.charge(items.len())?;
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::list(values))
            }
            Expr::Map(entries) => {
                self.charge(entries.len())?;
                let mut values = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = map_key(&self.eval(key)?)?;
                    values.push((key, self.eval(value)?));
                }
                Ok(Value::map(values))
            }
            Expr::Member { target, name, safe } => {
                let receiver = self.eval(target)?;
                self.member(&receiver, name, *safe)
            }
            Expr::Call {
                target,
                method,
                args,
                safe,
            } => {
                let receiver = self.eval(target)?;
                if receiver.is_null() {
                    if *safe {
                        return Ok(Value::Null);
                    }
                    return Err(EvalError::null_reference(&format!("call '{method}'")));
                }
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(&receiver, method, &values)
            }
            Expr::Index { target, index } => {
                let receiver = self.eval(target)?;
                let index = self.eval(index)?;
                self.index(&receiver, &index)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                unary(*op, &value)
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right),
            Expr::Ternary {
                condition,
                then,
                otherwise,
            } => {
                if self.condition(condition, "ternary condition")? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Elvis { value, fallback } => {
                let value = self.eval(value)?;
                match &value {
                    Value::Null => self.eval(fallback),
                    Value::Str(s) if s.is_empty() => self.eval(fallback),
                    _ => Ok(value),
                }
            }
            Expr::Collection { op, target, body } => {
                let receiver = self.eval(target)?;
                self.collection(*op, &receiver, body)
            }
        }
    }

    /// Resolve a bare name: members of `#this` shadow context bindings.
    fn resolve(&self, name: &str) -> Result<Value, EvalError> {
        if let Some(current) = self.scope.last() {
            match current {
                Value::Map(map) => {
                    if let Some(value) = read_map(map).get(name) {
                        return Ok(value.clone());
                    }
                }
                Value::Object(object) if !is_denied_member(name) => {
                    if let Some(value) = object.property(name) {
                        return Ok(value);
                    }
                }
                _ => {}
            }
        }
        self.context
            .lookup(name)
            .cloned()
            .ok_or_else(|| EvalError::unknown_binding(name))
    }

    fn member(&self, receiver: &Value, name: &str, safe: bool) -> Result<Value, EvalError> {
        if is_denied_member(name) {
            return Err(EvalError::access_denied(&format!("property '{name}'")));
        }
        match receiver {
            Value::Null if safe => Ok(Value::Null),
            Value::Null => Err(EvalError::null_reference(&format!(
                "read property '{name}'"
            ))),
            Value::Map(map) => {
                if let Some(value) = read_map(map).get(name) {
                    return Ok(value.clone());
                }
                Ok(builtin_property(receiver, name).unwrap_or(Value::Null))
            }
            Value::Object(object) => object.property(name).ok_or_else(|| {
                EvalError::unknown_member(object.type_name(), name).with_frame(
                    object.namespace(),
                    object.type_name(),
                    name,
                )
            }),
            other => builtin_property(other, name)
                .ok_or_else(|| EvalError::unknown_member(other.type_name(), name)),
        }
    }

    fn call(&mut self, receiver: &Value, method: &str, args: &[Value]) -> Result<Value, EvalError> {
        if is_denied_member(method) {
            return Err(EvalError::access_denied(&format!("method '{method}'")));
        }
        let result = match receiver {
            Value::Object(object) => object
                .invoke(method, args)
                .map_err(|e| e.with_frame(object.namespace(), object.type_name(), method))?,
            other => call_builtin(other, method, args, self.limits.max_string_len)?,
        };
        self.bounded(result)
    }

    fn index(&self, receiver: &Value, index: &Value) -> Result<Value, EvalError> {
        match receiver {
            Value::Null => Err(EvalError::null_reference("index into")),
            Value::Map(map) => {
                let key = map_key(index)?;
                Ok(read_map(map).get(&key).cloned().unwrap_or(Value::Null))
            }
            Value::Str(s) => {
                let i = index_arg(index)?;
                let chars: Vec<Value> = s.chars().map(|c| Value::str(c.to_string())).collect();
                index_list(&chars, i)
            }
            other => match other.elements() {
                Some(items) => index_list(&items, index_arg(index)?),
                None => Err(EvalError::type_mismatch(
                    "indexable value",
                    other.type_name(),
                )),
            },
        }
    }

    fn condition(&mut self, expr: &Expr, what: &str) -> Result<bool, EvalError> {
        let value = self.eval(expr)?;
        value
            .as_bool()
            .ok_or_else(|| EvalError::type_mismatch(&format!("boolean {what}"), value.type_name()))
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, EvalError> {
        match op {
            BinaryOp::And => {
                let result = self.condition(left, "operand of '&&'")?
                    && self.condition(right, "operand of '&&'")?;
                return Ok(Value::Bool(result));
            }
            BinaryOp::Or => {
                let result = self.condition(left, "operand of '||'")?
                    || self.condition(right, "operand of '||'")?;
                return Ok(Value::Bool(result));
            }
            _ => {}
        }
        let l = self.eval(left)?;
        let r = self.eval(right)?;
        match op {
            BinaryOp::Add => {
                if matches!(l, Value::Str(_)) || matches!(r, Value::Str(_)) {
                    return self.bounded(Value::str(format!("{l}{r}")));
                }
                arithmetic(op, &l, &r)
            }
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                arithmetic(op, &l, &r)
            }
            BinaryOp::Eq => Ok(Value::Bool(l.loose_eq(&r))),
            BinaryOp::Ne => Ok(Value::Bool(!l.loose_eq(&r))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = l.compare(&r).ok_or_else(|| {
                    EvalError::type_mismatch(
                        &format!("comparable operands for '{}'", op.symbol()),
                        &format!("{} and {}", l.type_name(), r.type_name()),
                    )
                })?;
                Ok(Value::Bool(match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }))
            }
            BinaryOp::In => membership(&l, &r),
            BinaryOp::And | BinaryOp::Or => match (l.as_bool(), r.as_bool()) {
                (Some(a), Some(b)) => Ok(Value::Bool(if op == BinaryOp::And { a && b } else { a || b })),
                _ => Err(EvalError::type_mismatch(
                    &format!("boolean operands for '{}'", op.symbol()),
                    &format!("{} and {}", l.type_name(), r.type_name()),
                )),
            },
        }
    }

    fn collection(
        &mut self,
        op: CollectionOp,
        receiver: &Value,
        body: &Expr,
    ) -> Result<Value, EvalError> {
        let (items, from_map) = match receiver {
            Value::Null => {
                return Err(EvalError::null_reference("apply a collection operator to"))
            }
            Value::Map(map) => {
                let entries = read_map(map)
                    .iter()
                    .map(|(key, value)| {
                        Value::object(MapEntry {
                            key: key.clone(),
                            value: value.clone(),
                        })
                    })
                    .collect();
                (entries, true)
            }
            other => match other.elements() {
                Some(items) => (items, false),
                None => {
                    return Err(EvalError::type_mismatch(
                        "list or map",
                        other.type_name(),
                    ))
                }
            },
        };

        // Projections produce one element per input; selections at most that.
        self.charge(items.len())?;
        let mut selected = Vec::new();
        for item in items {
            self.check_interrupt()?;
            self.scope.push(item.clone());
            let outcome = self.eval(body);
            self.scope.pop();
            let outcome = outcome?;
            match op {
                CollectionOp::Project => selected.push(outcome),
                _ => {
                    let keep = outcome.as_bool().ok_or_else(|| {
                        EvalError::type_mismatch("boolean selection predicate", outcome.type_name())
                    })?;
                    if keep {
                        if op == CollectionOp::First {
                            return Ok(single(item, from_map));
                        }
                        selected.push(item);
                    }
                }
            }
        }

        match op {
            CollectionOp::Project => Ok(Value::list(selected)),
            CollectionOp::Last => Ok(selected
                .pop()
                .map(|item| single(item, from_map))
                .unwrap_or(Value::Null)),
            CollectionOp::First => Ok(Value::Null),
            CollectionOp::Select if from_map => Ok(entries_to_map(selected)),
            CollectionOp::Select => Ok(Value::list(selected)),
        }
    }

    fn bounded(&mut self, value: Value) -> Result<Value, EvalError> {
        match &value {
            Value::Str(s) => {
                if s.chars().count() > self.limits.max_string_len {
                    return Err(EvalError::limit_exceeded(format!(
                        "string result exceeds {} characters",
                        self.limits.max_string_len
                    )));
                }
            }
            Value::List(_) | Value::Map(_) => {
                self.charge(value.collection_len().unwrap_or(0))?;
            }
            _ => {}
        }
        Ok(value)
    }

    /// Account for a collection of `len` elements.
    fn charge(&mut self, len: usize) -> Result<(), EvalError> {
        if len > self.limits.max_collection_len {
            return Err(EvalError::limit_exceeded(format!(
                "collection of {len} elements exceeds {}",
                self.limits.max_collection_len
            )));
        }
        self.produced = self.produced.saturating_add(len);
        if self.produced > self.limits.max_total_elements {
            return Err(EvalError::limit_exceeded(format!(
                "evaluation produced more than {} collection elements",
                self.limits.max_total_elements
            )));
        }
        Ok(())
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(n) => Value::Int(*n),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::str(s.as_str()),
    }
}

fn index_arg(index: &Value) -> Result<i64, EvalError> {
    index
        .as_int()
        .ok_or_else(|| EvalError::type_mismatch("integer index", index.type_name()))
}

fn unary(op: UnaryOp, value: &Value) -> Result<Value, EvalError> {
    match (op, value) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| EvalError::overflow("negation")),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Not, other) => Err(EvalError::type_mismatch("boolean operand of '!'", other.type_name())),
        (UnaryOp::Neg, other) => Err(EvalError::type_mismatch("numeric operand of '-'", other.type_name())),
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0 {
                return Err(EvalError::division_by_zero());
            }
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            result
                .map(Value::Int)
                .ok_or_else(|| EvalError::overflow(op.symbol()))
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let a = as_f64(l);
            let b = as_f64(r);
            if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0.0 {
                return Err(EvalError::division_by_zero());
            }
            Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => a % b,
            }))
        }
        _ => Err(EvalError::type_mismatch(
            &format!("numeric operands for '{}'", op.symbol()),
            &format!("{} and {}", l.type_name(), r.type_name()),
        )),
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Int(n) => *n as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}

fn membership(needle: &Value, haystack: &Value) -> Result<Value, EvalError> {
    match haystack {
        Value::Map(map) => {
            let key = map_key(needle)?;
            Ok(Value::Bool(read_map(map).contains_key(&key)))
        }
        Value::Str(s) => match needle {
            Value::Str(part) => Ok(Value::Bool(s.contains(&**part))),
            other => Err(EvalError::type_mismatch("string operand of 'in'", other.type_name())),
        },
        other => match other.elements() {
            Some(items) => Ok(Value::Bool(items.iter().any(|item| item.loose_eq(needle)))),
            None => Err(EvalError::type_mismatch(
                "list, map or string after 'in'",
                other.type_name(),
            )),
        },
    }
}

/// A single selected element; map entries come back as one-entry maps.
fn single(item: Value, from_map: bool) -> Value {
    if from_map {
        entries_to_map(vec![item])
    } else {
        item
    }
}

fn entries_to_map(entries: Vec<Value>) -> Value {
    let pairs = entries.into_iter().filter_map(|entry| match entry {
        Value::Object(object) => {
            let key = object.property("key")?;
            let value = object.property("value")?;
            Some((key.as_str()?.to_string(), value))
        }
        _ => None,
    });
    Value::map(pairs)
}
