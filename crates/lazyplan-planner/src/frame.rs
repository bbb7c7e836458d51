//! `LazyFrame`: the deferred plan builder.
//!
//! A frame is a root node in an `Arc`-shared arena. Extending a frame clones
//! the arena only when another frame still holds it, so derived frames share
//! their common prefix by node id. Every call validates the new node against
//! its inputs and fails immediately with `Error::Schema` or `Error::Arity`.

use std::fmt;
use std::sync::Arc;

use lazyplan_core::arena::{LogicalPlan, PlanArena};
use lazyplan_core::error::Result;
use lazyplan_core::expr::Expr;
use lazyplan_core::id::NodeId;
use lazyplan_core::plan::{JoinType, PlanNode, SortKey};
use lazyplan_core::schema::Schema;
use lazyplan_core::source::{DataSource, SourceRef};

use crate::explain::explain_logical;

#[derive(Clone)]
pub struct LazyFrame {
    arena: Arc<PlanArena>,
    root: NodeId,
}

impl fmt::Debug for LazyFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyFrame")
            .field("root", &self.root)
            .field("nodes", &self.arena.len())
            .finish()
    }
}

impl LazyFrame {
    pub fn scan<S: DataSource + 'static>(source: S) -> Result<Self> {
        Self::scan_ref(SourceRef::new(source))
    }

    /// Scan an already shared source; scans of the same source identity are
    /// structurally identical.
    pub fn scan_ref(source: SourceRef) -> Result<Self> {
        let mut arena = PlanArena::new();
        let root = arena.add(PlanNode::Scan {
            source,
            projection: None,
            predicate: None,
            limit: None,
        })?;
        Ok(Self {
            arena: Arc::new(arena),
            root,
        })
    }

    fn extend(&self, node: PlanNode) -> Result<Self> {
        let mut arena = Arc::clone(&self.arena);
        let root = Arc::make_mut(&mut arena).add(node)?;
        Ok(Self { arena, root })
    }

    /// Bring `other`'s subgraph into a copy of this frame's arena.
    fn absorb(&self, others: &[&LazyFrame]) -> Result<(Arc<PlanArena>, Vec<NodeId>)> {
        let mut arena = Arc::clone(&self.arena);
        let mut ids = Vec::with_capacity(others.len());
        for other in others {
            if Arc::ptr_eq(&self.arena, &other.arena) {
                ids.push(other.root);
            } else {
                ids.push(Arc::make_mut(&mut arena).import(&other.arena, other.root)?);
            }
        }
        Ok((arena, ids))
    }

    pub fn filter(&self, predicate: Expr) -> Result<Self> {
        self.extend(PlanNode::Filter {
            input: self.root,
            predicate,
        })
    }

    pub fn select<I>(&self, exprs: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<Expr>,
    {
        self.extend(PlanNode::Select {
            input: self.root,
            exprs: exprs.into_iter().map(Into::into).collect(),
        })
    }

    /// Keep every existing column and add (or replace, by output name) the
    /// given expressions.
    pub fn with_columns<I>(&self, exprs: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<Expr>,
    {
        let added: Vec<Expr> = exprs.into_iter().map(Into::into).collect();
        let mut out: Vec<Expr> = Vec::new();
        for name in self.schema().names() {
            match added.iter().find(|e| e.output_name() == name) {
                Some(replacement) => out.push(replacement.clone()),
                None => out.push(Expr::Column(name)),
            }
        }
        for e in &added {
            if !self.schema().contains(&e.output_name()) {
                out.push(e.clone());
            }
        }
        self.select(out)
    }

    pub fn group_by<I, S>(&self, keys: I) -> GroupBy
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        GroupBy {
            frame: self.clone(),
            keys: keys.into_iter().map(Into::into).collect(),
            maintain_order: false,
        }
    }

    pub fn join<S: Into<String>>(
        &self,
        other: &LazyFrame,
        left_on: impl IntoIterator<Item = S>,
        right_on: impl IntoIterator<Item = S>,
        how: JoinType,
    ) -> Result<Self> {
        let (mut arena, ids) = self.absorb(&[other])?;
        let root = Arc::make_mut(&mut arena).add(PlanNode::Join {
            left: self.root,
            right: ids[0],
            left_on: left_on.into_iter().map(Into::into).collect(),
            right_on: right_on.into_iter().map(Into::into).collect(),
            how,
        })?;
        Ok(Self { arena, root })
    }

    pub fn sort<I>(&self, by: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<SortKey>,
    {
        self.extend(PlanNode::Sort {
            input: self.root,
            by: by.into_iter().map(Into::into).collect(),
            limit: None,
        })
    }

    /// Sort and keep the first `k` rows.
    pub fn top_k<I>(&self, by: I, k: usize) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<SortKey>,
    {
        self.extend(PlanNode::Sort {
            input: self.root,
            by: by.into_iter().map(Into::into).collect(),
            limit: Some(k),
        })
    }

    pub fn head(&self, n: usize) -> Result<Self> {
        self.slice(0, n)
    }

    /// The last `n` rows.
    pub fn tail(&self, n: usize) -> Result<Self> {
        let offset = i64::try_from(n).map_err(|_| {
            lazyplan_core::Error::Plan(format!("tail length {n} is out of range"))
        })?;
        self.slice(-offset, n)
    }

    /// `len` rows starting at `offset`; a negative offset counts from the end.
    pub fn slice(&self, offset: i64, len: usize) -> Result<Self> {
        self.extend(PlanNode::Slice {
            input: self.root,
            offset,
            len,
        })
    }

    /// Concatenate `others` after this frame. Column names follow this frame.
    pub fn union(&self, others: &[LazyFrame]) -> Result<Self> {
        let refs: Vec<&LazyFrame> = others.iter().collect();
        let (mut arena, ids) = self.absorb(&refs)?;
        let mut inputs = vec![self.root];
        inputs.extend(ids);
        let root = Arc::make_mut(&mut arena).add(PlanNode::Union { inputs })?;
        Ok(Self { arena, root })
    }

    /// Drop duplicate rows, comparing only `subset` columns when given.
    pub fn distinct(&self, subset: Option<Vec<String>>) -> Result<Self> {
        self.extend(PlanNode::Distinct {
            input: self.root,
            subset,
        })
    }

    pub fn schema(&self) -> &Schema {
        // The root was validated on insertion; a miss means an empty schema.
        static EMPTY: Schema = Schema { fields: Vec::new() };
        self.arena.schema(self.root).unwrap_or(&EMPTY)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn arena(&self) -> &PlanArena {
        &self.arena
    }

    /// Single-root plan over the reachable part of the arena.
    pub fn logical_plan(&self) -> Result<LogicalPlan> {
        LogicalPlan::new((*self.arena).clone(), vec![self.root]).compact()
    }

    /// Render the unoptimized logical plan.
    pub fn explain(&self) -> Result<String> {
        explain_logical(&self.logical_plan()?)
    }
}

/// Pending `group_by`; finish with `agg`.
#[derive(Debug, Clone)]
pub struct GroupBy {
    frame: LazyFrame,
    keys: Vec<String>,
    maintain_order: bool,
}

impl GroupBy {
    /// Emit groups in first-seen order.
    pub fn maintain_order(mut self) -> Self {
        self.maintain_order = true;
        self
    }

    pub fn agg<I>(self, aggs: I) -> Result<LazyFrame>
    where
        I: IntoIterator,
        I::Item: Into<Expr>,
    {
        self.frame.extend(PlanNode::Aggregate {
            input: self.frame.root,
            keys: self.keys,
            aggs: aggs.into_iter().map(Into::into).collect(),
            maintain_order: self.maintain_order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazyplan_core::expr::{col, count_rows, lit};
    use lazyplan_core::schema::DataType;
    use lazyplan_core::types::Scalar;
    use lazyplan_core::Error;
    use lazyplan_io::MemorySource;

    fn people() -> LazyFrame {
        let src = MemorySource::from_columns(
            "people",
            vec![
                ("id", vec![Scalar::I64(1), Scalar::I64(2)]),
                ("name", vec![Scalar::Str("a".into()), Scalar::Str("b".into())]),
                ("age", vec![Scalar::I32(30), Scalar::I32(40)]),
            ],
        )
        .unwrap();
        LazyFrame::scan(src).unwrap()
    }

    #[test]
    fn builder_errors_surface_at_the_call() {
        let lf = people();
        assert!(matches!(lf.filter(col("missing").gt(lit(1))), Err(Error::Schema(_))));
        assert!(matches!(lf.filter(col("name").gt(col("id"))), Err(Error::Schema(_))));
        assert!(matches!(lf.filter(col("id") + lit(1i64)), Err(Error::Schema(_))));
        assert!(matches!(lf.select([col("id").sum()]), Err(Error::Schema(_))));
        assert!(matches!(
            lf.group_by(["name"]).agg([col("id")]),
            Err(Error::Schema(_))
        ));
        assert!(matches!(
            lf.select([col("id"), col("age").alias("id")]),
            Err(Error::Schema(_))
        ));
        let other = lf.select([col("id")]).unwrap();
        assert!(matches!(lf.union(&[other.clone()]), Err(Error::Arity(_))));
        assert!(matches!(
            lf.join(&other, ["id", "name"], ["id"], JoinType::Inner),
            Err(Error::Arity(_))
        ));
        assert!(matches!(
            lf.join(&other, ["name"], ["id"], JoinType::Inner),
            Err(Error::Arity(_))
        ));
    }

    #[test]
    fn derived_frames_share_the_prefix() {
        let base = people().filter(col("age").gt(lit(18))).unwrap();
        let a = base.select([col("id")]).unwrap();
        let b = base.head(1).unwrap();
        assert_eq!(a.arena().node(base.root()).unwrap(), b.arena().node(base.root()).unwrap());
        assert_eq!(
            a.arena().fingerprint(base.root()).unwrap(),
            b.arena().fingerprint(base.root()).unwrap()
        );
    }

    #[test]
    fn join_naming_and_group_by_schema() {
        let lf = people();
        let joined = lf.join(&lf, ["id"], ["id"], JoinType::Left).unwrap();
        assert_eq!(
            joined.schema().names(),
            vec!["id", "name", "age", "name_right", "age_right"]
        );
        assert!(joined.schema().field_by_name("age_right").unwrap().nullable);

        let agg = lf
            .group_by(["name"])
            .maintain_order()
            .agg([col("age").mean().alias("avg_age"), count_rows()])
            .unwrap();
        assert_eq!(agg.schema().names(), vec!["name", "avg_age", "count"]);
        assert_eq!(agg.schema().fields[1].data_type, DataType::Float64);
    }

    #[test]
    fn with_columns_replaces_by_name() {
        let lf = people()
            .with_columns([(col("age") * lit(2)).alias("age"), lit(true).alias("flag")])
            .unwrap();
        assert_eq!(lf.schema().names(), vec!["id", "name", "age", "flag"]);
        let plan = lf.logical_plan().unwrap();
        assert_eq!(plan.arena.len(), 2);
        assert!(lf.explain().unwrap().contains("SCAN memory://people"));
    }
}
