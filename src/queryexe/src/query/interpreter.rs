use super::compiler::{compile_graph, Edge, ExtensionRegistry, Graph};
use crate::config::ExecConfig;
use common::dataflow::Source;
use common::database::DataContext;
use common::logical_plan::LogicalPlan;
use common::{QueryError, QueryResult, Row, TableSchema};
use optimizer::Rewriter;
use std::iter::FusedIterator;
use std::rc::Rc;

enum State {
    /// Graph built, nothing run yet.
    Pending(Graph),
    /// Nodes have run; the root output is being handed out.
    Draining {
        rows: Option<Box<dyn Source>>,
        error: Option<QueryError>,
    },
    Done,
}

/// Evaluates a logical plan by building a data-flow graph of execution nodes.
///
/// The interpreter is a single-pass sequence of result rows. Nothing runs until the first
/// call to `next`; a failure while running is returned after the rows the root already produced.
pub struct Interpreter {
    data_context: Rc<DataContext>,
    plan: LogicalPlan,
    schema: TableSchema,
    state: State,
}

impl Interpreter {
    /// Rewrites a copy of the plan and builds its graph.
    ///
    /// # Arguments
    ///
    /// * `data_context` - Parameters, clock, entities and cancel flag of this query.
    /// * `plan` - Plan to evaluate. It is not modified.
    /// * `config` - Execution settings.
    pub fn new(
        data_context: Rc<DataContext>,
        plan: &LogicalPlan,
        config: &ExecConfig,
    ) -> Result<Self, QueryError> {
        Self::with_extensions(data_context, plan, config, &ExtensionRegistry::new())
    }

    /// Like `new`, resolving extension operators through `extensions` first.
    pub fn with_extensions(
        data_context: Rc<DataContext>,
        plan: &LogicalPlan,
        config: &ExecConfig,
        extensions: &ExtensionRegistry,
    ) -> Result<Self, QueryError> {
        let mut plan = plan.clone();
        let applied = Rewriter::new(config.pushdown).rewrite(&mut plan, &*data_context)?;
        if config.debug_rewrites {
            info!("plan after {} rewrite(s):\n{}", applied, plan);
        } else {
            debug!("applied {} rewrite(s)", applied);
        }
        let graph = compile_graph(&plan, &data_context, extensions)?;
        let schema = plan
            .schema(graph.root)
            .cloned()
            .ok_or_else(|| QueryError::InternalError(String::from("root has no schema")))?;
        Ok(Self {
            data_context,
            plan,
            schema,
            state: State::Pending(graph),
        })
    }

    /// Shape of the result rows.
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// The plan after rewriting.
    pub fn plan(&self) -> &LogicalPlan {
        &self.plan
    }

    /// Runs every node once, inputs first. Stops at the first failure or cancellation.
    fn run(data_context: &DataContext, mut graph: Graph) -> State {
        let mut error = None;
        for index in &graph.order {
            if let Err(e) = data_context.check_cancelled() {
                info!("query cancelled before node {}", index);
                error = Some(e);
                break;
            }
            let result = match graph.infos.get_mut(index) {
                Some(info) => info.node.run(),
                None => Err(QueryError::InternalError(format!("node {} was never built", index))),
            };
            if let Err(e) = result {
                error!("node {} failed: {}", index, e);
                error = Some(e);
                break;
            }
        }
        let rows = match graph.infos.get(&graph.root) {
            Some(info) => match info.output.source(Edge::result()) {
                Ok(rows) => Some(rows),
                Err(e) => {
                    error = error.or(Some(e));
                    None
                }
            },
            None => None,
        };
        State::Draining { rows, error }
    }

    /// Consumes the remaining rows and renders them as a fixed-width table.
    pub fn execute(&mut self) -> Result<QueryResult, QueryError> {
        let width = self
            .schema
            .attributes()
            .map(|a| a.name().len())
            .max()
            .unwrap_or(10)
            + 2;
        let mut res = String::new();
        for attr in self.schema.attributes() {
            res += &format!("{:width$}", attr.name(), width = width);
        }
        res += "\n";
        for row in self {
            for f in row?.field_vals() {
                res += &format!("{:width$}", f.to_string(), width = width);
            }
            res += "\n";
        }
        Ok(QueryResult::new(&res))
    }
}

impl Iterator for Interpreter {
    type Item = Result<Row, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.state {
                State::Pending(_) => {
                    if let State::Pending(graph) = std::mem::replace(&mut self.state, State::Done) {
                        self.state = Self::run(&self.data_context, graph);
                    }
                }
                State::Draining { rows, error } => {
                    if let Err(e) = self.data_context.check_cancelled() {
                        self.state = State::Done;
                        return Some(Err(e));
                    }
                    let next = match rows.as_mut() {
                        Some(rows) => rows.receive(),
                        None => Ok(None),
                    };
                    match next {
                        Ok(Some(row)) => return Some(Ok(row)),
                        Ok(None) => {
                            let error = error.take();
                            self.state = State::Done;
                            return error.map(Err);
                        }
                        Err(e) => {
                            self.state = State::Done;
                            return Some(Err(e));
                        }
                    }
                }
                State::Done => return None,
            }
        }
    }
}

impl FusedIterator for Interpreter {}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::*;
    use common::dataflow::{ExtensionOp, ImplementContext, Node, Sink};
    use common::logical_plan::*;
    use common::storage_trait::Entity;
    use common::testutil::*;
    use common::{AggFunc, DataType, Expr, Field, Operator};
    use memstore::{MemTable, ScanMode};
    use std::sync::Arc;

    fn collect(interpreter: Interpreter) -> Vec<Row> {
        interpreter.collect::<Result<Vec<Row>, QueryError>>().unwrap()
    }

    fn run_plan(ctx: DataContext, plan: &LogicalPlan) -> Vec<Row> {
        collect(Interpreter::new(Rc::new(ctx), plan, &ExecConfig::default()).unwrap())
    }

    fn letters_schema() -> TableSchema {
        TableSchema::from_vecs(vec!["id", "letter"], vec![DataType::Int, DataType::String])
    }

    fn letters() -> Vec<Vec<Field>> {
        vec![
            vec![Field::from(1), Field::from("a")],
            vec![Field::from(2), Field::from("b")],
            vec![Field::from(3), Field::from("c")],
        ]
    }

    fn ints(values: &[i64]) -> Vec<Vec<Field>> {
        values.iter().map(|v| vec![Field::from(*v)]).collect()
    }

    #[test]
    fn test_values_filter_project() {
        init();
        let mut plan = LogicalPlan::new();
        let values = plan.add_values(letters_schema(), letters()).unwrap();
        let filter = plan
            .add_filter(values, Expr::gt(Expr::input(0), Expr::lit(1)))
            .unwrap();
        plan.add_project(filter, vec![Expr::input(1)], &[]).unwrap();
        let rows = run_plan(DataContext::new(0), &plan);
        assert_eq!(
            rows,
            vec![Row::new(vec![Field::from("b")]), Row::new(vec![Field::from("c")])]
        );
    }

    #[test]
    fn test_filter_drops_false_and_null() {
        let mut plan = LogicalPlan::new();
        let values = plan
            .add_values(
                int_schema(&["a"]),
                vec![
                    vec![Field::from(5)],
                    vec![Field::Null],
                    vec![Field::from(0)],
                    vec![Field::from(9)],
                ],
            )
            .unwrap();
        plan.add_filter(values, Expr::gt(Expr::input(0), Expr::lit(3)))
            .unwrap();
        let rows = run_plan(DataContext::new(0), &plan);
        assert_eq!(rows, create_row_list(vec![vec![5], vec![9]]));
    }

    #[test]
    fn test_join_duplicate_keys_left_major() {
        let mut plan = LogicalPlan::new();
        let left = plan
            .add_values(
                letters_schema(),
                vec![
                    vec![Field::from(1), Field::from("a")],
                    vec![Field::from(1), Field::from("b")],
                    vec![Field::from(2), Field::from("c")],
                ],
            )
            .unwrap();
        let right = plan
            .add_values(
                letters_schema(),
                vec![
                    vec![Field::from(1), Field::from("x")],
                    vec![Field::from(1), Field::from("y")],
                    vec![Field::from(3), Field::from("z")],
                ],
            )
            .unwrap();
        plan.add_join(
            left,
            right,
            Expr::eq(Expr::input(0), Expr::input(2)),
            JoinType::Inner,
        )
        .unwrap();
        let rows = run_plan(DataContext::new(0), &plan);
        let expected: Vec<Row> = [("a", "x"), ("a", "y"), ("b", "x"), ("b", "y")]
            .iter()
            .map(|(l, r)| {
                Row::new(vec![
                    Field::from(1),
                    Field::from(*l),
                    Field::from(1),
                    Field::from(*r),
                ])
            })
            .collect();
        assert_eq!(rows, expected);
    }

    #[test]
    fn test_join_reads_right_once() {
        let table = StrictTable::new("r", int_schema(&["k"]), create_row_list(vec![vec![1], vec![2]]));
        let opens = table.opens();
        let ctx = DataContext::new(0).with_entity(Rc::new(table));
        let mut plan = LogicalPlan::new();
        let left = plan
            .add_values(int_schema(&["k"]), ints(&[1, 2, 3, 2]))
            .unwrap();
        let right = plan.add_scan("r", int_schema(&["k"])).unwrap();
        plan.add_join(
            left,
            right,
            Expr::eq(Expr::input(0), Expr::input(1)),
            JoinType::Inner,
        )
        .unwrap();
        let rows = run_plan(ctx, &plan);
        assert_eq!(
            rows,
            create_row_list(vec![vec![1, 1], vec![2, 2], vec![2, 2]])
        );
        assert_eq!(opens.get(), 1);
    }

    #[test]
    fn test_join_empty_left_still_drains_right() {
        let table = StrictTable::new("r", int_schema(&["k"]), create_row_list(vec![vec![1]]));
        let opens = table.opens();
        let ctx = DataContext::new(0).with_entity(Rc::new(table));
        let mut plan = LogicalPlan::new();
        let left = plan.add_values(int_schema(&["k"]), vec![]).unwrap();
        let right = plan.add_scan("r", int_schema(&["k"])).unwrap();
        plan.add_join(
            left,
            right,
            Expr::eq(Expr::input(0), Expr::input(1)),
            JoinType::Right,
        )
        .unwrap();
        let rows = run_plan(ctx, &plan);
        assert_eq!(rows, vec![Row::new(vec![Field::Null, Field::from(1)])]);
        assert_eq!(opens.get(), 1);
    }

    fn join_plan(join_type: JoinType) -> LogicalPlan {
        let mut plan = LogicalPlan::new();
        let left = plan
            .add_values(int_schema(&["a"]), ints(&[1, 2, 3]))
            .unwrap();
        let right = plan
            .add_values(int_schema(&["b"]), ints(&[2, 3, 3, 4]))
            .unwrap();
        plan.add_join(left, right, Expr::eq(Expr::input(0), Expr::input(1)), join_type)
            .unwrap();
        plan
    }

    fn opt(values: &[Option<i64>]) -> Row {
        Row::new(
            values
                .iter()
                .map(|v| v.map_or(Field::Null, Field::from))
                .collect(),
        )
    }

    #[test]
    fn test_outer_joins() {
        let left = run_plan(DataContext::new(0), &join_plan(JoinType::Left));
        assert_eq!(
            left,
            vec![
                opt(&[Some(1), None]),
                opt(&[Some(2), Some(2)]),
                opt(&[Some(3), Some(3)]),
                opt(&[Some(3), Some(3)]),
            ]
        );
        let right = run_plan(DataContext::new(0), &join_plan(JoinType::Right));
        assert_eq!(
            right,
            vec![
                opt(&[Some(2), Some(2)]),
                opt(&[Some(3), Some(3)]),
                opt(&[Some(3), Some(3)]),
                opt(&[None, Some(4)]),
            ]
        );
        let full = run_plan(DataContext::new(0), &join_plan(JoinType::Full));
        assert_eq!(full.len(), 5);
        assert_eq!(full[0], opt(&[Some(1), None]));
        assert_eq!(full[4], opt(&[None, Some(4)]));
    }

    #[test]
    fn test_semi_and_anti_joins() {
        let semi = run_plan(DataContext::new(0), &join_plan(JoinType::Semi));
        assert_eq!(semi, create_row_list(vec![vec![2], vec![3]]));
        let anti = run_plan(DataContext::new(0), &join_plan(JoinType::Anti));
        assert_eq!(anti, create_row_list(vec![vec![1]]));
    }

    #[test]
    fn test_sort_without_keys_stops_at_limit() {
        let rows: Vec<Row> = (1..=10).map(|i| int_vec_to_row(vec![i])).collect();
        let table = StrictTable::new("t", int_schema(&["a"]), rows);
        let pulls = table.pulls();
        let ctx = DataContext::new(0).with_entity(Rc::new(table));
        let mut plan = LogicalPlan::new();
        let scan = plan.add_scan("t", int_schema(&["a"])).unwrap();
        plan.add_sort(scan, vec![], 2, Some(3)).unwrap();
        let rows = run_plan(ctx, &plan);
        assert_eq!(rows, create_row_list(vec![vec![3], vec![4], vec![5]]));
        assert_eq!(pulls.get(), 5);
    }

    #[test]
    fn test_sort_matches_sort_then_slice() {
        let input = gen_random_int_rows(60, 2, 8, 5);
        let mut plan = LogicalPlan::new();
        let tuples = input.iter().map(|r| r.values().to_vec()).collect();
        let values = plan.add_values(get_int_table_schema(2), tuples).unwrap();
        let keys = vec![SortKey::asc(0), SortKey::desc(1)];
        plan.add_sort(values, keys.clone(), 7, Some(20)).unwrap();
        let rows = run_plan(DataContext::new(0), &plan);

        let mut expected = input.clone();
        expected.sort_by(|a, b| {
            let key = |r: &Row, i: usize| match r.get_field(i) {
                Some(Field::IntField(v)) => Some(*v),
                _ => None,
            };
            // Nulls last on the ascending key, first on the descending one.
            let first = match (key(a, 0), key(b, 0)) {
                (None, None) => std::cmp::Ordering::Equal,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (Some(_), None) => std::cmp::Ordering::Less,
                (Some(x), Some(y)) => x.cmp(&y),
            };
            first.then_with(|| match (key(a, 1), key(b, 1)) {
                (None, None) => std::cmp::Ordering::Equal,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (Some(_), None) => std::cmp::Ordering::Greater,
                (Some(x), Some(y)) => y.cmp(&x),
            })
        });
        let expected: Vec<Row> = expected.into_iter().skip(7).take(20).collect();
        assert_eq!(rows, expected);
    }

    #[test]
    fn test_sort_offset_past_end() {
        let mut plan = LogicalPlan::new();
        let values = plan.add_values(int_schema(&["a"]), ints(&[3, 1, 2])).unwrap();
        plan.add_sort(values, vec![SortKey::asc(0)], 5, None).unwrap();
        assert!(run_plan(DataContext::new(0), &plan).is_empty());
        let mut plan = LogicalPlan::new();
        let values = plan.add_values(int_schema(&["a"]), ints(&[3, 1, 2])).unwrap();
        plan.add_sort(values, vec![SortKey::asc(0)], 1, Some(-1)).unwrap();
        assert_eq!(
            run_plan(DataContext::new(0), &plan),
            create_row_list(vec![vec![2], vec![3]])
        );
    }

    #[test]
    fn test_union_distinct_and_all() {
        for all in &[false, true] {
            let mut plan = LogicalPlan::new();
            let a = plan.add_values(int_schema(&["a"]), ints(&[1, 2, 2])).unwrap();
            let b = plan.add_values(int_schema(&["a"]), ints(&[3, 1])).unwrap();
            plan.add_union(vec![a, b], *all).unwrap();
            let rows = run_plan(DataContext::new(0), &plan);
            if *all {
                assert_eq!(
                    rows,
                    create_row_list(vec![vec![1], vec![2], vec![2], vec![3], vec![1]])
                );
            } else {
                assert_eq!(rows, create_row_list(vec![vec![1], vec![2], vec![3]]));
            }
        }
    }

    #[test]
    fn test_shared_node_fans_out() {
        let mut plan = LogicalPlan::new();
        let values = plan.add_values(int_schema(&["a"]), ints(&[1, 2, 3])).unwrap();
        let big = plan
            .add_filter(values, Expr::gt(Expr::input(0), Expr::lit(1)))
            .unwrap();
        plan.add_union(vec![values, big, values], true).unwrap();
        let rows = run_plan(DataContext::new(0), &plan);
        assert_eq!(
            rows,
            create_row_list(vec![
                vec![1],
                vec![2],
                vec![3],
                vec![2],
                vec![3],
                vec![1],
                vec![2],
                vec![3]
            ])
        );
    }

    #[test]
    fn test_self_join_of_shared_node() {
        let mut plan = LogicalPlan::new();
        let values = plan.add_values(int_schema(&["a"]), ints(&[1, 2])).unwrap();
        plan.add_join(
            values,
            values,
            Expr::lt(Expr::input(0), Expr::input(1)),
            JoinType::Inner,
        )
        .unwrap();
        let rows = run_plan(DataContext::new(0), &plan);
        assert_eq!(rows, create_row_list(vec![vec![1, 2]]));
    }

    #[test]
    fn test_aggregate_groups_in_first_seen_order() {
        let mut plan = LogicalPlan::new();
        let values = plan
            .add_values(
                int_schema(&["g", "v"]),
                vec![
                    vec![Field::from(2), Field::from(10)],
                    vec![Field::from(1), Field::from(5)],
                    vec![Field::from(2), Field::Null],
                    vec![Field::from(1), Field::from(7)],
                ],
            )
            .unwrap();
        plan.add_aggregate(
            values,
            vec![0],
            vec![
                AggregateCall::new(AggFunc::Count, vec![]),
                AggregateCall::new(AggFunc::Sum, vec![1]),
                AggregateCall::new(AggFunc::Max, vec![1]),
            ],
        )
        .unwrap();
        let rows = run_plan(DataContext::new(0), &plan);
        assert_eq!(
            rows,
            create_row_list(vec![vec![2, 2, 10, 10], vec![1, 2, 12, 7]])
        );
    }

    #[test]
    fn test_global_aggregate_over_empty_input() {
        let mut plan = LogicalPlan::new();
        let values = plan.add_values(int_schema(&["v"]), vec![]).unwrap();
        plan.add_aggregate(
            values,
            vec![],
            vec![
                AggregateCall::new(AggFunc::Count, vec![]),
                AggregateCall::new(AggFunc::Sum, vec![0]),
            ],
        )
        .unwrap();
        let rows = run_plan(DataContext::new(0), &plan);
        assert_eq!(rows, vec![Row::new(vec![Field::from(0), Field::Null])]);

        let mut plan = LogicalPlan::new();
        let values = plan.add_values(int_schema(&["v"]), vec![]).unwrap();
        plan.add_aggregate(values, vec![0], vec![AggregateCall::new(AggFunc::Count, vec![])])
            .unwrap();
        assert!(run_plan(DataContext::new(0), &plan).is_empty());
    }

    #[test]
    fn test_grouping_sets_pad_missing_columns() {
        let mut plan = LogicalPlan::new();
        let values = plan
            .add_values(
                int_schema(&["g", "h", "v"]),
                [[1, 1, 10], [2, 1, 20], [1, 2, 5], [1, 1, 1]]
                    .iter()
                    .map(|r| r.iter().map(|v| Field::from(*v)).collect())
                    .collect(),
            )
            .unwrap();
        plan.add_grouping_aggregate(
            values,
            vec![0, 1],
            vec![vec![0, 1], vec![0], vec![]],
            vec![AggregateCall::new(AggFunc::Sum, vec![2])],
        )
        .unwrap();
        let rows = run_plan(DataContext::new(0), &plan);
        assert_eq!(
            rows,
            vec![
                opt(&[Some(1), Some(1), Some(11)]),
                opt(&[Some(2), Some(1), Some(20)]),
                opt(&[Some(1), Some(2), Some(5)]),
                opt(&[Some(1), None, Some(16)]),
                opt(&[Some(2), None, Some(20)]),
                opt(&[None, None, Some(36)]),
            ]
        );

        // Only the empty set produces a row over empty input.
        let mut plan = LogicalPlan::new();
        let values = plan.add_values(int_schema(&["g", "v"]), vec![]).unwrap();
        plan.add_grouping_aggregate(
            values,
            vec![0],
            vec![vec![0], vec![]],
            vec![AggregateCall::new(AggFunc::Count, vec![])],
        )
        .unwrap();
        let rows = run_plan(DataContext::new(0), &plan);
        assert_eq!(rows, vec![opt(&[None, Some(0)])]);
    }

    #[test]
    fn test_aggregate_rejected_before_reading() {
        let table = StrictTable::new("t", int_schema(&["a"]), create_row_list(vec![vec![1]]));
        let opens = table.opens();
        let ctx = Rc::new(DataContext::new(0).with_entity(Rc::new(table)));
        for call in vec![
            AggregateCall::new(AggFunc::Count, vec![0]).distinct(),
            AggregateCall::new(AggFunc::Custom(String::from("median")), vec![0]),
            AggregateCall::new(AggFunc::RowNumber, vec![]),
        ] {
            let mut plan = LogicalPlan::new();
            let scan = plan.add_scan("t", int_schema(&["a"])).unwrap();
            plan.add_aggregate(scan, vec![], vec![call]).unwrap();
            let result = Interpreter::new(Rc::clone(&ctx), &plan, &ExecConfig::default());
            assert!(matches!(result, Err(QueryError::InvalidAggregate(_))));
        }
        assert_eq!(opens.get(), 0);
    }

    #[test]
    fn test_window_partitions() {
        let mut plan = LogicalPlan::new();
        let values = plan
            .add_values(
                int_schema(&["g", "v"]),
                vec![
                    vec![Field::from(1), Field::from(30)],
                    vec![Field::from(2), Field::from(5)],
                    vec![Field::from(1), Field::from(10)],
                ],
            )
            .unwrap();
        plan.add_window(
            values,
            vec![
                WindowGroup {
                    partition_by: vec![0],
                    order_by: vec![],
                    calls: vec![AggregateCall::new(AggFunc::Sum, vec![1])],
                },
                WindowGroup {
                    partition_by: vec![0],
                    order_by: vec![SortKey::asc(1)],
                    calls: vec![AggregateCall::new(AggFunc::RowNumber, vec![])],
                },
            ],
        )
        .unwrap();
        let rows = run_plan(DataContext::new(0), &plan);
        assert_eq!(
            rows,
            create_row_list(vec![vec![1, 30, 40, 2], vec![2, 5, 5, 1], vec![1, 10, 40, 1]])
        );
    }

    #[test]
    fn test_scan_residual_with_stubborn_entity() {
        init();
        let schema = int_schema(&["a", "b", "c"]);
        let rows = gen_random_int_rows(50, 3, 10, 0);
        let mut plan = LogicalPlan::new();
        let scan = plan.add_scan("t", schema.clone()).unwrap();
        let filter = plan
            .add_filter(
                scan,
                Expr::and(vec![
                    Expr::gt(Expr::input(0), Expr::lit(2)),
                    Expr::lt(Expr::input(1), Expr::lit(8)),
                    Expr::binary(Operator::NotEquals, Expr::input(2), Expr::lit(5)),
                ]),
            )
            .unwrap();
        plan.add_project(filter, vec![Expr::input(1)], &[]).unwrap();

        let stubborn = Rc::new(StubbornTable::new("t", schema.clone(), rows.clone()));
        let ctx = Rc::new(DataContext::new(0).with_entity(stubborn.clone()));
        let interpreter = Interpreter::new(ctx, &plan, &ExecConfig::default()).unwrap();
        assert!(matches!(
            interpreter.plan().get_operator(interpreter.plan().root().unwrap()),
            Some(LogicalOp::Scan(_))
        ));
        let pushed = collect(interpreter);
        // One retry widens the projection to every column the filters need.
        assert_eq!(stubborn.requests(), vec![Some(vec![1]), Some(vec![1, 0, 2])]);

        let reference = MemTable::new("t", schema, rows).unwrap().with_mode(ScanMode::Scannable);
        let config = ExecConfig {
            pushdown: false,
            ..ExecConfig::default()
        };
        let ctx = Rc::new(DataContext::new(0).with_entity(Rc::new(reference)));
        let plain = collect(Interpreter::new(ctx, &plan, &config).unwrap());
        assert!(!plain.is_empty());
        assert_eq!(pushed, plain);
    }

    #[test]
    fn test_pushdown_matches_across_modes() {
        let schema = int_schema(&["a", "b"]);
        let rows = gen_random_int_rows(40, 2, 6, 7);
        let mut plan = LogicalPlan::new();
        let scan = plan.add_scan("t", schema.clone()).unwrap();
        let filter = plan
            .add_filter(
                scan,
                Expr::and(vec![
                    Expr::gt(Expr::lit(4), Expr::input(1)),
                    Expr::binary(Operator::GreaterThanOrEqual, Expr::input(0), Expr::lit(2)),
                ]),
            )
            .unwrap();
        plan.add_project(filter, vec![Expr::input(1), Expr::input(0)], &[])
            .unwrap();
        let mut results = Vec::new();
        for mode in &[
            ScanMode::ProjectableFilterable,
            ScanMode::Filterable,
            ScanMode::Scannable,
            ScanMode::Sequence,
        ] {
            let table = MemTable::new("t", schema.clone(), rows.clone())
                .unwrap()
                .with_mode(*mode);
            results.push(run_plan(DataContext::new(0).with_entity(Rc::new(table)), &plan));
        }
        for r in &results[1..] {
            assert_eq!(r, &results[0]);
        }
    }

    #[test]
    fn test_lazy_scan_fans_out_in_every_mode() {
        let schema = int_schema(&["a"]);
        let mut plan = LogicalPlan::new();
        let scan = plan.add_scan("t", schema.clone()).unwrap();
        let filter = plan
            .add_filter(scan, Expr::gt(Expr::input(0), Expr::lit(1)))
            .unwrap();
        plan.add_union(vec![scan, filter, scan], true).unwrap();
        let expected = create_row_list(vec![
            vec![1],
            vec![2],
            vec![3],
            vec![2],
            vec![3],
            vec![1],
            vec![2],
            vec![3],
        ]);
        for mode in &[
            ScanMode::ProjectableFilterable,
            ScanMode::Filterable,
            ScanMode::Scannable,
            ScanMode::Sequence,
        ] {
            let table = MemTable::new("t", schema.clone(), create_row_list(vec![vec![1], vec![2], vec![3]]))
                .unwrap()
                .with_mode(*mode);
            let rows = run_plan(DataContext::new(0).with_entity(Rc::new(table)), &plan);
            assert_eq!(rows, expected, "mode {}", mode);
        }
    }

    #[test]
    fn test_invented_filter_is_fatal() {
        let schema = int_schema(&["a"]);
        let table = StubbornTable::new("t", schema.clone(), create_row_list(vec![vec![1]]))
            .inventing(Expr::lt(Expr::input(0), Expr::lit(0)));
        let ctx = Rc::new(DataContext::new(0).with_entity(Rc::new(table)));
        let mut plan = LogicalPlan::new();
        let scan = plan.add_scan("t", schema).unwrap();
        plan.add_filter(scan, Expr::gt(Expr::input(0), Expr::lit(0)))
            .unwrap();
        assert!(matches!(
            Interpreter::new(ctx, &plan, &ExecConfig::default()),
            Err(QueryError::EntityProtocol(_))
        ));
    }

    #[test]
    fn test_unknown_table_and_no_capability() {
        let mut plan = LogicalPlan::new();
        plan.add_scan("missing", int_schema(&["a"])).unwrap();
        let ctx = Rc::new(DataContext::new(0));
        assert!(Interpreter::new(ctx, &plan, &ExecConfig::default()).is_err());

        let opaque = OpaqueTable::new("t", int_schema(&["a"]));
        let ctx = Rc::new(DataContext::new(0).with_entity(Rc::new(opaque)));
        let mut plan = LogicalPlan::new();
        plan.add_scan("t", int_schema(&["a"])).unwrap();
        assert!(matches!(
            Interpreter::new(ctx, &plan, &ExecConfig::default()),
            Err(QueryError::NoScanCapability(_))
        ));
    }

    #[test]
    fn test_error_follows_delivered_rows() {
        let mut plan = LogicalPlan::new();
        let values = plan.add_values(int_schema(&["a"]), ints(&[5, 0, 2])).unwrap();
        plan.add_project(
            values,
            vec![Expr::binary(Operator::Divide, Expr::lit(10), Expr::input(0))],
            &["q"],
        )
        .unwrap();
        let mut interpreter =
            Interpreter::new(Rc::new(DataContext::new(0)), &plan, &ExecConfig::default()).unwrap();
        assert_eq!(interpreter.next().unwrap().unwrap(), int_vec_to_row(vec![2]));
        assert!(matches!(
            interpreter.next(),
            Some(Err(QueryError::ExecutionError(_)))
        ));
        assert!(interpreter.next().is_none());
        assert!(interpreter.next().is_none());
    }

    #[test]
    fn test_cancellation() {
        let mut plan = LogicalPlan::new();
        plan.add_values(int_schema(&["a"]), ints(&[1, 2, 3])).unwrap();
        let ctx = Rc::new(DataContext::new(0));
        let mut interpreter = Interpreter::new(Rc::clone(&ctx), &plan, &ExecConfig::default()).unwrap();
        ctx.cancel_flag().cancel();
        assert!(matches!(interpreter.next(), Some(Err(QueryError::Interrupted(_)))));
        assert!(interpreter.next().is_none());

        let ctx = Rc::new(DataContext::new(0));
        let mut interpreter = Interpreter::new(Rc::clone(&ctx), &plan, &ExecConfig::default()).unwrap();
        assert!(interpreter.next().unwrap().is_ok());
        ctx.cancel_flag().cancel();
        assert!(matches!(interpreter.next(), Some(Err(QueryError::Interrupted(_)))));
        assert!(interpreter.next().is_none());
    }

    #[test]
    fn test_parameters_and_timestamp() {
        let mut plan = LogicalPlan::new();
        let values = plan.add_values(int_schema(&["a"]), ints(&[1, 7])).unwrap();
        let filter = plan
            .add_filter(values, Expr::gt(Expr::input(0), Expr::param(0)))
            .unwrap();
        plan.add_project(
            filter,
            vec![
                Expr::input(0),
                Expr::call(Operator::CurrentTimestamp, vec![]),
            ],
            &["a", "ts"],
        )
        .unwrap();
        let ctx = DataContext::new(1234).with_parameters(vec![Field::from(3)]);
        assert_eq!(run_plan(ctx, &plan), create_row_list(vec![vec![7, 1234]]));
    }

    #[test]
    fn test_calc_is_split() {
        let mut plan = LogicalPlan::new();
        let values = plan.add_values(letters_schema(), letters()).unwrap();
        plan.add_calc(
            values,
            Some(Expr::lt(Expr::input(0), Expr::lit(3))),
            vec![Expr::input(1)],
            &[],
        )
        .unwrap();
        let config = ExecConfig {
            pushdown: false,
            ..ExecConfig::default()
        };
        let rows =
            collect(Interpreter::new(Rc::new(DataContext::new(0)), &plan, &config).unwrap());
        assert_eq!(
            rows,
            vec![Row::new(vec![Field::from("a")]), Row::new(vec![Field::from("b")])]
        );
    }

    #[test]
    fn test_execute_renders_table() {
        let mut plan = LogicalPlan::new();
        plan.add_values(letters_schema(), letters()).unwrap();
        let mut interpreter =
            Interpreter::new(Rc::new(DataContext::new(0)), &plan, &ExecConfig::default()).unwrap();
        let result = interpreter.execute().unwrap();
        let lines: Vec<&str> = result.result().lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("id"));
        assert!(lines[2].contains('b'));
    }

    /// Emits every input row twice.
    struct Repeat {
        source: Box<dyn common::dataflow::Source>,
        sink: Box<dyn Sink>,
    }

    impl Node for Repeat {
        fn run(&mut self) -> Result<(), QueryError> {
            while let Some(row) = self.source.receive()? {
                self.sink.send(row.clone())?;
                self.sink.send(row)?;
            }
            self.sink.end()
        }
    }

    fn repeat(ctx: &mut dyn ImplementContext) -> Result<Box<dyn Node>, QueryError> {
        Ok(Box::new(Repeat {
            source: ctx.source(0)?,
            sink: ctx.sink()?,
        }))
    }

    struct NamedOp(&'static str);

    impl ExtensionOp for NamedOp {
        fn name(&self) -> &str {
            self.0
        }
    }

    struct SelfImplementing;

    impl ExtensionOp for SelfImplementing {
        fn name(&self) -> &str {
            "self_repeat"
        }

        fn implement(
            &self,
            ctx: &mut dyn ImplementContext,
        ) -> Option<Result<Box<dyn Node>, QueryError>> {
            Some(repeat(ctx))
        }
    }

    fn extension_plan(op: Arc<dyn ExtensionOp>) -> LogicalPlan {
        let mut plan = LogicalPlan::new();
        let values = plan.add_values(int_schema(&["a"]), ints(&[1, 2])).unwrap();
        plan.add_extension(vec![values], op, int_schema(&["a"]))
            .unwrap();
        plan
    }

    #[test]
    fn test_extensions() {
        let expected = create_row_list(vec![vec![1], vec![1], vec![2], vec![2]]);
        let mut registry = ExtensionRegistry::new();
        registry.register("repeat", |_: &dyn ExtensionOp, ctx: &mut dyn ImplementContext| {
            repeat(ctx)
        });
        assert!(registry.contains("repeat"));
        let ctx = Rc::new(DataContext::new(0));
        let config = ExecConfig::default();

        let plan = extension_plan(Arc::new(NamedOp("repeat")));
        let interpreter =
            Interpreter::with_extensions(Rc::clone(&ctx), &plan, &config, &registry).unwrap();
        assert_eq!(collect(interpreter), expected);

        let plan = extension_plan(Arc::new(SelfImplementing));
        let interpreter = Interpreter::new(Rc::clone(&ctx), &plan, &config).unwrap();
        assert_eq!(collect(interpreter), expected);

        let plan = extension_plan(Arc::new(NamedOp("mystery")));
        assert!(matches!(
            Interpreter::with_extensions(ctx, &plan, &config, &registry),
            Err(QueryError::UnsupportedPlan(_))
        ));
    }

    #[test]
    fn test_failed_node_stops_consumers() {
        let runs = Rc::new(std::cell::Cell::new(0));
        let mut registry = ExtensionRegistry::new();
        let counter = Rc::clone(&runs);
        registry.register("counted", move |_: &dyn ExtensionOp, ctx: &mut dyn ImplementContext| {
            let inner = repeat(ctx)?;
            Ok(Box::new(Counted {
                inner,
                runs: Rc::clone(&counter),
            }) as Box<dyn Node>)
        });
        let mut plan = LogicalPlan::new();
        let values = plan.add_values(int_schema(&["x"]), ints(&[5, 0])).unwrap();
        let project = plan
            .add_project(
                values,
                vec![Expr::binary(Operator::Divide, Expr::lit(10), Expr::input(0))],
                &["q"],
            )
            .unwrap();
        plan.add_extension(vec![project], Arc::new(NamedOp("counted")), int_schema(&["q"]))
            .unwrap();
        let mut interpreter = Interpreter::with_extensions(
            Rc::new(DataContext::new(0)),
            &plan,
            &ExecConfig::default(),
            &registry,
        )
        .unwrap();
        assert!(matches!(
            interpreter.next(),
            Some(Err(QueryError::ExecutionError(_)))
        ));
        assert!(interpreter.next().is_none());
        assert_eq!(runs.get(), 0);
    }

    /// Counts how often the wrapped node runs.
    struct Counted {
        inner: Box<dyn Node>,
        runs: Rc<std::cell::Cell<usize>>,
    }

    impl Node for Counted {
        fn run(&mut self) -> Result<(), QueryError> {
            self.runs.set(self.runs.get() + 1);
            self.inner.run()
        }
    }

    #[test]
    fn test_source_plan_is_untouched() {
        let table = MemTable::new("t", int_schema(&["a"]), create_row_list(vec![vec![1], vec![4]]))
            .unwrap();
        assert_eq!(table.name(), "t");
        let ctx = Rc::new(DataContext::new(0).with_entity(Rc::new(table)));
        let mut plan = LogicalPlan::new();
        let scan = plan.add_scan("t", int_schema(&["a"])).unwrap();
        plan.add_filter(scan, Expr::gt(Expr::input(0), Expr::lit(2)))
            .unwrap();
        let before = plan.to_json().unwrap();
        let interpreter = Interpreter::new(ctx, &plan, &ExecConfig::default()).unwrap();
        assert_eq!(plan.to_json().unwrap(), before);
        assert_eq!(interpreter.plan().node_count(), plan.node_count());
        assert_eq!(collect(interpreter), create_row_list(vec![vec![4]]));
    }
}
