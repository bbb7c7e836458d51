//! Column expressions.
//!
//! An `Expr` is pure data: it names columns, literals and operations, and is
//! type-checked against a `Schema` when a plan node is added to an arena.
//! Evaluation lives in `lazyplan-operators`; scalar semantics live in
//! [`crate::kernels`] so the optimizer can fold constants with exactly the
//! runtime rules.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{DataType, Field, Schema};
use crate::types::Scalar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Function {
    Contains,
    StartsWith,
    EndsWith,
    Lowercase,
    Uppercase,
    StrLen,
    Abs,
    Coalesce,
}

impl Function {
    pub fn name(&self) -> &'static str {
        match self {
            Function::Contains => "contains",
            Function::StartsWith => "starts_with",
            Function::EndsWith => "ends_with",
            Function::Lowercase => "lowercase",
            Function::Uppercase => "uppercase",
            Function::StrLen => "str_len",
            Function::Abs => "abs",
            Function::Coalesce => "coalesce",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggFunc {
    /// Non-null values of the input.
    Count,
    /// All rows of the group, input ignored.
    CountRows,
    Sum,
    Mean,
    Min,
    Max,
    First,
    Last,
    NUnique,
}

impl AggFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Count => "count",
            AggFunc::CountRows => "count_rows",
            AggFunc::Sum => "sum",
            AggFunc::Mean => "mean",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::First => "first",
            AggFunc::Last => "last",
            AggFunc::NUnique => "n_unique",
        }
    }

    /// Result type for an input of type `input`.
    pub fn output_type(&self, input: DataType) -> Result<DataType> {
        match self {
            AggFunc::Count | AggFunc::CountRows | AggFunc::NUnique => Ok(DataType::Int64),
            AggFunc::Sum => match input {
                DataType::Int32 | DataType::Int64 | DataType::Null => Ok(DataType::Int64),
                DataType::Float32 | DataType::Float64 => Ok(DataType::Float64),
                other => Err(Error::Schema(format!("cannot sum values of type {other}"))),
            },
            AggFunc::Mean => {
                if input.is_numeric() || input == DataType::Null {
                    Ok(DataType::Float64)
                } else {
                    Err(Error::Schema(format!("cannot average values of type {input}")))
                }
            }
            AggFunc::Min | AggFunc::Max => {
                if input.is_orderable() {
                    Ok(input)
                } else {
                    Err(Error::Schema(format!(
                        "{} requires an orderable type, got {input}",
                        self.name()
                    )))
                }
            }
            AggFunc::First | AggFunc::Last => Ok(input),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Column(String),
    Literal(Scalar),
    Alias {
        expr: Box<Expr>,
        name: String,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Function {
        func: Function,
        args: Vec<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        to: DataType,
    },
    Agg {
        func: AggFunc,
        /// `None` only for `CountRows`.
        input: Option<Box<Expr>>,
    },
}

/// Reference a column by name.
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(name.into())
}

/// A literal value.
pub fn lit(value: impl Into<Scalar>) -> Expr {
    Expr::Literal(value.into())
}

/// Typed-less `NULL` literal.
pub fn null() -> Expr {
    Expr::Literal(Scalar::Null)
}

/// Number of rows in the group.
pub fn count_rows() -> Expr {
    Expr::Agg {
        func: AggFunc::CountRows,
        input: None,
    }
}

/// First non-null argument, left to right.
pub fn coalesce(args: Vec<Expr>) -> Expr {
    Expr::Function {
        func: Function::Coalesce,
        args,
    }
}

impl From<Scalar> for Expr {
    fn from(v: Scalar) -> Self {
        Expr::Literal(v)
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        lit(v)
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        lit(v)
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        lit(v)
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        lit(v)
    }
}

impl From<&str> for Expr {
    fn from(v: &str) -> Self {
        lit(v)
    }
}

impl Expr {
    pub fn alias(self, name: impl Into<String>) -> Expr {
        Expr::Alias {
            expr: Box::new(self),
            name: name.into(),
        }
    }

    pub fn binary(self, op: BinaryOp, right: impl Into<Expr>) -> Expr {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(right.into()),
        }
    }

    pub fn eq(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn neq(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::NotEq, other)
    }

    pub fn lt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn lt_eq(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::LtEq, other)
    }

    pub fn gt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn gt_eq(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::GtEq, other)
    }

    pub fn and(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Or, other)
    }

    pub fn not(self) -> Expr {
        self.unary(UnaryOp::Not)
    }

    pub fn is_null(self) -> Expr {
        self.unary(UnaryOp::IsNull)
    }

    pub fn is_not_null(self) -> Expr {
        self.unary(UnaryOp::IsNotNull)
    }

    fn unary(self, op: UnaryOp) -> Expr {
        Expr::Unary {
            op,
            expr: Box::new(self),
        }
    }

    pub fn cast(self, to: DataType) -> Expr {
        Expr::Cast {
            expr: Box::new(self),
            to,
        }
    }

    fn call(self, func: Function, rest: Vec<Expr>) -> Expr {
        let mut args = Vec::with_capacity(rest.len() + 1);
        args.push(self);
        args.extend(rest);
        Expr::Function { func, args }
    }

    pub fn contains(self, pattern: impl Into<Expr>) -> Expr {
        self.call(Function::Contains, vec![pattern.into()])
    }

    pub fn starts_with(self, prefix: impl Into<Expr>) -> Expr {
        self.call(Function::StartsWith, vec![prefix.into()])
    }

    pub fn ends_with(self, suffix: impl Into<Expr>) -> Expr {
        self.call(Function::EndsWith, vec![suffix.into()])
    }

    pub fn lowercase(self) -> Expr {
        self.call(Function::Lowercase, vec![])
    }

    pub fn uppercase(self) -> Expr {
        self.call(Function::Uppercase, vec![])
    }

    pub fn str_len(self) -> Expr {
        self.call(Function::StrLen, vec![])
    }

    pub fn abs(self) -> Expr {
        self.call(Function::Abs, vec![])
    }

    pub fn fill_null(self, fallback: impl Into<Expr>) -> Expr {
        self.call(Function::Coalesce, vec![fallback.into()])
    }

    fn agg(self, func: AggFunc) -> Expr {
        Expr::Agg {
            func,
            input: Some(Box::new(self)),
        }
    }

    pub fn count(self) -> Expr {
        self.agg(AggFunc::Count)
    }

    pub fn sum(self) -> Expr {
        self.agg(AggFunc::Sum)
    }

    pub fn mean(self) -> Expr {
        self.agg(AggFunc::Mean)
    }

    pub fn min(self) -> Expr {
        self.agg(AggFunc::Min)
    }

    pub fn max(self) -> Expr {
        self.agg(AggFunc::Max)
    }

    pub fn first(self) -> Expr {
        self.agg(AggFunc::First)
    }

    pub fn last(self) -> Expr {
        self.agg(AggFunc::Last)
    }

    pub fn n_unique(self) -> Expr {
        self.agg(AggFunc::NUnique)
    }

    /// Name of the column this expression produces.
    pub fn output_name(&self) -> String {
        match self {
            Expr::Column(name) => name.clone(),
            Expr::Alias { name, .. } => name.clone(),
            Expr::Literal(_) => "literal".to_string(),
            Expr::Binary { left, .. } => left.output_name(),
            Expr::Unary { expr, .. } | Expr::Cast { expr, .. } => expr.output_name(),
            Expr::Function { args, .. } => args
                .first()
                .map(|a| a.output_name())
                .unwrap_or_else(|| "literal".to_string()),
            Expr::Agg { input: Some(input), .. } => input.output_name(),
            Expr::Agg { input: None, .. } => "count".to_string(),
        }
    }

    pub fn as_literal(&self) -> Option<&Scalar> {
        match self {
            Expr::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_column(&self) -> Option<&str> {
        match self {
            Expr::Column(name) => Some(name),
            _ => None,
        }
    }

    /// Strip any aliases.
    pub fn unaliased(&self) -> &Expr {
        match self {
            Expr::Alias { expr, .. } => expr.unaliased(),
            other => other,
        }
    }

    /// Direct sub-expressions.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column(_) | Expr::Literal(_) => vec![],
            Expr::Alias { expr, .. } | Expr::Unary { expr, .. } | Expr::Cast { expr, .. } => {
                vec![expr.as_ref()]
            }
            Expr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::Function { args, .. } => args.iter().collect(),
            Expr::Agg { input, .. } => input.iter().map(|b| b.as_ref()).collect(),
        }
    }

    /// Referenced column names, in first-reference order, without duplicates.
    pub fn columns(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        self.collect_columns(&mut seen, &mut out);
        out
    }

    fn collect_columns(&self, seen: &mut BTreeSet<String>, out: &mut Vec<String>) {
        if let Expr::Column(name) = self {
            if seen.insert(name.clone()) {
                out.push(name.clone());
            }
            return;
        }
        for child in self.children() {
            child.collect_columns(seen, out);
        }
    }

    pub fn contains_agg(&self) -> bool {
        matches!(self, Expr::Agg { .. }) || self.children().iter().any(|c| c.contains_agg())
    }

    /// Aggregation expression shape accepted by `Aggregate`: `Agg` or an
    /// alias of one, with no nested aggregation inside.
    pub fn is_valid_aggregation(&self) -> bool {
        match self.unaliased() {
            Expr::Agg { input, .. } => input.as_ref().map_or(true, |i| !i.contains_agg()),
            _ => false,
        }
    }

    /// `a and (b and c)` becomes `[a, b, c]`.
    pub fn split_conjunction(self) -> Vec<Expr> {
        match self {
            Expr::Binary {
                left,
                op: BinaryOp::And,
                right,
            } => {
                let mut out = left.split_conjunction();
                out.extend(right.split_conjunction());
                out
            }
            other => vec![other],
        }
    }

    /// Inverse of `split_conjunction`; `None` for an empty list.
    pub fn conjunction(exprs: Vec<Expr>) -> Option<Expr> {
        exprs.into_iter().reduce(|acc, e| acc.and(e))
    }

    /// Rebuild bottom-up, applying `f` to every node after its children.
    pub fn transform<F>(self, f: &mut F) -> Expr
    where
        F: FnMut(Expr) -> Expr,
    {
        let rebuilt = match self {
            Expr::Column(_) | Expr::Literal(_) => self,
            Expr::Alias { expr, name } => Expr::Alias {
                expr: Box::new(expr.transform(f)),
                name,
            },
            Expr::Binary { left, op, right } => Expr::Binary {
                left: Box::new(left.transform(f)),
                op,
                right: Box::new(right.transform(f)),
            },
            Expr::Unary { op, expr } => Expr::Unary {
                op,
                expr: Box::new(expr.transform(f)),
            },
            Expr::Function { func, args } => Expr::Function {
                func,
                args: args.into_iter().map(|a| a.transform(f)).collect(),
            },
            Expr::Cast { expr, to } => Expr::Cast {
                expr: Box::new(expr.transform(f)),
                to,
            },
            Expr::Agg { func, input } => Expr::Agg {
                func,
                input: input.map(|i| Box::new(i.transform(f))),
            },
        };
        f(rebuilt)
    }

    /// Rename column references per `mapping`; unmapped columns are untouched.
    pub fn rename_columns(self, mapping: &HashMap<String, String>) -> Expr {
        self.transform(&mut |e| match e {
            Expr::Column(name) => match mapping.get(&name) {
                Some(new) => Expr::Column(new.clone()),
                None => Expr::Column(name),
            },
            other => other,
        })
    }

    /// Static type of this expression against `schema`.
    ///
    /// Aggregations are typed here too; whether they are allowed at this
    /// position is the caller's concern.
    pub fn data_type(&self, schema: &Schema) -> Result<DataType> {
        match self {
            Expr::Column(name) => Ok(schema.require(name)?.data_type),
            Expr::Literal(v) => Ok(v.data_type()),
            Expr::Alias { expr, .. } => expr.data_type(schema),
            Expr::Binary { left, op, right } => {
                let lt = left.data_type(schema)?;
                let rt = right.data_type(schema)?;
                binary_type(*op, lt, rt).ok_or_else(|| {
                    Error::Schema(format!(
                        "cannot apply '{}' to {lt} and {rt} in {self}",
                        op.symbol()
                    ))
                })
            }
            Expr::Unary { op, expr } => {
                let t = expr.data_type(schema)?;
                match op {
                    UnaryOp::IsNull | UnaryOp::IsNotNull => Ok(DataType::Boolean),
                    UnaryOp::Not if matches!(t, DataType::Boolean | DataType::Null) => {
                        Ok(DataType::Boolean)
                    }
                    UnaryOp::Neg if t.is_numeric() || t == DataType::Null => Ok(t),
                    _ => Err(Error::Schema(format!("cannot apply {op:?} to {t} in {self}"))),
                }
            }
            Expr::Function { func, args } => {
                let types = args
                    .iter()
                    .map(|a| a.data_type(schema))
                    .collect::<Result<Vec<_>>>()?;
                function_type(*func, &types).ok_or_else(|| {
                    let listed: Vec<String> = types.iter().map(|t| t.to_string()).collect();
                    Error::Schema(format!(
                        "invalid arguments for {}: ({})",
                        func.name(),
                        listed.join(", ")
                    ))
                })
            }
            Expr::Cast { expr, to } => {
                let from = expr.data_type(schema)?;
                if can_cast(from, *to) {
                    Ok(*to)
                } else {
                    Err(Error::Schema(format!("cannot cast {from} to {to}")))
                }
            }
            Expr::Agg { func, input } => {
                let t = match input {
                    Some(input) => {
                        if input.contains_agg() {
                            return Err(Error::Schema(format!("nested aggregation in {self}")));
                        }
                        input.data_type(schema)?
                    }
                    None => DataType::Null,
                };
                func.output_type(t)
            }
        }
    }

    /// Conservative nullability of the result.
    pub fn nullable(&self, schema: &Schema) -> bool {
        match self {
            Expr::Column(name) => schema.field_by_name(name).map_or(true, |f| f.nullable),
            Expr::Literal(v) => v.is_null(),
            Expr::Alias { expr, .. } | Expr::Cast { expr, .. } => expr.nullable(schema),
            Expr::Binary { left, op, right } => {
                matches!(op, BinaryOp::Div | BinaryOp::Rem)
                    || left.nullable(schema)
                    || right.nullable(schema)
            }
            Expr::Unary { op, expr } => match op {
                UnaryOp::IsNull | UnaryOp::IsNotNull => false,
                _ => expr.nullable(schema),
            },
            Expr::Function { func, args } => match func {
                Function::Coalesce => args.iter().all(|a| a.nullable(schema)),
                _ => args.iter().any(|a| a.nullable(schema)),
            },
            Expr::Agg { func, .. } => !matches!(
                func,
                AggFunc::Count | AggFunc::CountRows | AggFunc::NUnique
            ),
        }
    }

    /// Output field (name, type, nullability) of this expression.
    pub fn to_field(&self, schema: &Schema) -> Result<Field> {
        Ok(Field::new(
            self.output_name(),
            self.data_type(schema)?,
            self.nullable(schema),
        ))
    }
}

/// Result type of `lt op rt`, or `None` when the operands don't type-check.
///
/// `kernels::binary` produces values of exactly this type.
pub fn binary_type(op: BinaryOp, lt: DataType, rt: DataType) -> Option<DataType> {
    use DataType as T;
    match op {
        BinaryOp::Add if lt == T::Utf8 || rt == T::Utf8 => match (lt, rt) {
            (T::Utf8, T::Utf8) | (T::Utf8, T::Null) | (T::Null, T::Utf8) => Some(T::Utf8),
            _ => None,
        },
        BinaryOp::Div => match (lt, rt) {
            (a, b) if (a.is_integer() || a == T::Null) && (b.is_integer() || b == T::Null) => {
                Some(T::Float64)
            }
            _ => arithmetic_type(lt, rt),
        },
        op if op.is_arithmetic() => arithmetic_type(lt, rt),
        op if op.is_comparison() => {
            let common = T::unify(lt, rt)?;
            match op {
                BinaryOp::Eq | BinaryOp::NotEq => Some(T::Boolean),
                _ if common.is_orderable() => Some(T::Boolean),
                _ => None,
            }
        }
        _ => match (lt, rt) {
            (T::Boolean | T::Null, T::Boolean | T::Null) => Some(T::Boolean),
            _ => None,
        },
    }
}

fn arithmetic_type(lt: DataType, rt: DataType) -> Option<DataType> {
    match (lt, rt) {
        (DataType::Null, DataType::Null) => Some(DataType::Null),
        (DataType::Null, t) | (t, DataType::Null) if t.is_numeric() => Some(t),
        (a, b) => DataType::promote_numeric(a, b),
    }
}

fn function_type(func: Function, args: &[DataType]) -> Option<DataType> {
    use DataType as T;
    let stringy = |t: &T| matches!(t, T::Utf8 | T::Null);
    match func {
        Function::Contains | Function::StartsWith | Function::EndsWith => match args {
            [a, b] if stringy(a) && stringy(b) => Some(T::Boolean),
            _ => None,
        },
        Function::Lowercase | Function::Uppercase => match args {
            [a] if stringy(a) => Some(T::Utf8),
            _ => None,
        },
        Function::StrLen => match args {
            [a] if stringy(a) => Some(T::Int64),
            _ => None,
        },
        Function::Abs => match args {
            [a] if a.is_numeric() || *a == T::Null => Some(*a),
            _ => None,
        },
        Function::Coalesce => {
            let (first, rest) = args.split_first()?;
            rest.iter().try_fold(*first, |acc, t| T::unify(acc, *t))
        }
    }
}

/// Whether `kernels::cast` supports `from -> to`.
pub fn can_cast(from: DataType, to: DataType) -> bool {
    use DataType as T;
    if from == to || from == T::Null || to == T::Utf8 {
        return true;
    }
    match (from, to) {
        (a, b) if a.is_numeric() && b.is_numeric() => true,
        (T::Boolean, b) if b.is_numeric() => true,
        (T::Utf8, b) if b.is_numeric() || b == T::Boolean || b == T::Binary => true,
        _ => false,
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(name) => write!(f, "col({name})"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Alias { expr, name } => write!(f, "{expr} AS {name}"),
            Expr::Binary { left, op, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Unary { op, expr } => match op {
                UnaryOp::Not => write!(f, "not({expr})"),
                UnaryOp::Neg => write!(f, "-({expr})"),
                UnaryOp::IsNull => write!(f, "{expr}.is_null()"),
                UnaryOp::IsNotNull => write!(f, "{expr}.is_not_null()"),
            },
            Expr::Function { func, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", func.name(), args.join(", "))
            }
            Expr::Cast { expr, to } => write!(f, "cast({expr} as {to})"),
            Expr::Agg { func, input } => match input {
                Some(input) => write!(f, "{}({input})", func.name()),
                None => write!(f, "{}()", func.name()),
            },
        }
    }
}

macro_rules! impl_arith_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Expr>> std::ops::$trait<T> for Expr {
            type Output = Expr;
            fn $method(self, rhs: T) -> Expr {
                self.binary($op, rhs)
            }
        }
    };
}

impl_arith_op!(Add, add, BinaryOp::Add);
impl_arith_op!(Sub, sub, BinaryOp::Sub);
impl_arith_op!(Mul, mul, BinaryOp::Mul);
impl_arith_op!(Div, div, BinaryOp::Div);
impl_arith_op!(Rem, rem, BinaryOp::Rem);

impl std::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        self.unary(UnaryOp::Neg)
    }
}
