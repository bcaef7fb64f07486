//! Tests for cursor navigation against the in-memory server
//!
//! These tests verify row positioning, the rowset cache, and how many
//! round trips each move costs.

use netcursor::{
    ColumnInfo, Config, Connection, CursorOptions, Error, FetchDirection, MemoryServer,
    ResultSet, ResultSetType, Sensitivity, Value,
};

const EMP: &str = "SELECT ID, NAME FROM APP.EMP";

fn emp_server(rows: i64) -> MemoryServer {
    let server = MemoryServer::new();
    server.add_table(
        EMP,
        vec![
            ColumnInfo::new("ID").with_table("APP", "EMP"),
            ColumnInfo::new("NAME").with_table("APP", "EMP"),
        ],
        (1..=rows)
            .map(|id| vec![Value::Integer(id), Value::from(format!("emp{}", id))])
            .collect(),
    );
    server
}

fn connect(server: &MemoryServer) -> Connection {
    Connection::new(
        Box::new(server.transport()),
        Config::new().with_auto_commit(false),
    )
}

async fn current_id(rs: &ResultSet) -> i64 {
    rs.get_value(1).await.unwrap().as_i64().unwrap()
}

mod cache_tests {
    use super::*;

    #[tokio::test]
    async fn test_rows_in_window_cost_no_round_trips() {
        let server = emp_server(10);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(EMP, CursorOptions::scroll_insensitive().with_fetch_size(3))
            .await
            .unwrap();
        let after_open = server.round_trips();

        for expected in 1..=3 {
            assert!(rs.next().await.unwrap());
            assert_eq!(current_id(&rs).await, expected);
        }
        assert_eq!(server.round_trips(), after_open);

        assert!(rs.next().await.unwrap());
        assert_eq!(current_id(&rs).await, 4);
        assert_eq!(server.round_trips(), after_open + 1);

        assert!(rs.next().await.unwrap());
        assert!(rs.next().await.unwrap());
        assert_eq!(current_id(&rs).await, 6);
        assert_eq!(server.round_trips(), after_open + 1);
    }

    #[tokio::test]
    async fn test_forward_only_blocks() {
        let server = emp_server(10);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(EMP, CursorOptions::new().with_fetch_size(3))
            .await
            .unwrap();
        let after_open = server.round_trips();

        for _ in 0..3 {
            assert!(rs.next().await.unwrap());
        }
        assert_eq!(server.round_trips(), after_open);
        assert!(rs.next().await.unwrap());
        assert_eq!(current_id(&rs).await, 4);
        assert_eq!(server.round_trips(), after_open + 1);
    }

    #[tokio::test]
    async fn test_name_lookup() {
        let server = emp_server(2);
        let conn = connect(&server);
        let rs = conn.open_cursor(EMP, CursorOptions::new()).await.unwrap();
        assert!(rs.next().await.unwrap());
        assert_eq!(rs.get_by_name("name").await.unwrap(), Value::from("emp1"));
        assert!(matches!(
            rs.get_by_name("SALARY").await,
            Err(Error::InvalidColumnIndex { .. })
        ));
    }
}

mod scroll_tests {
    use super::*;

    #[tokio::test]
    async fn test_absolute_and_get_row() {
        let server = emp_server(10);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(EMP, CursorOptions::scroll_insensitive().with_fetch_size(3))
            .await
            .unwrap();

        assert!(rs.absolute(5).await.unwrap());
        assert_eq!(rs.get_row().await.unwrap(), 5);
        assert_eq!(current_id(&rs).await, 5);

        assert!(rs.absolute(-1).await.unwrap());
        assert_eq!(rs.get_row().await.unwrap(), 10);
        assert!(rs.is_last().await.unwrap());

        assert!(!rs.absolute(0).await.unwrap());
        assert!(rs.is_before_first().await.unwrap());
        assert_eq!(rs.get_row().await.unwrap(), 0);

        assert!(!rs.absolute(11).await.unwrap());
        assert!(rs.is_after_last().await.unwrap());
        assert_eq!(rs.get_row().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_relative_moves() {
        let server = emp_server(10);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(EMP, CursorOptions::scroll_insensitive().with_fetch_size(3))
            .await
            .unwrap();

        assert!(rs.absolute(5).await.unwrap());
        assert!(rs.relative(0).await.unwrap());
        assert_eq!(rs.get_row().await.unwrap(), 5);

        assert!(rs.relative(-2).await.unwrap());
        assert_eq!(rs.get_row().await.unwrap(), 3);

        assert!(!rs.relative(10).await.unwrap());
        assert!(rs.is_after_last().await.unwrap());
        assert!(!rs.relative(0).await.unwrap());

        assert!(rs.relative(-1).await.unwrap());
        assert_eq!(rs.get_row().await.unwrap(), 10);
        assert_eq!(current_id(&rs).await, 10);
    }

    #[tokio::test]
    async fn test_first_last_and_edges() {
        let server = emp_server(4);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(EMP, CursorOptions::scroll_insensitive().with_fetch_size(2))
            .await
            .unwrap();

        assert!(rs.is_before_first().await.unwrap());
        assert!(rs.last().await.unwrap());
        assert_eq!(current_id(&rs).await, 4);
        assert!(rs.is_last().await.unwrap());

        assert!(rs.first().await.unwrap());
        assert_eq!(current_id(&rs).await, 1);
        assert!(rs.is_first().await.unwrap());
        assert!(!rs.previous().await.unwrap());
        assert!(rs.is_before_first().await.unwrap());

        rs.after_last().await.unwrap();
        assert!(rs.is_after_last().await.unwrap());
        assert!(rs.previous().await.unwrap());
        assert_eq!(current_id(&rs).await, 4);
    }

    #[tokio::test]
    async fn test_backward_iteration_without_rowsets() {
        let server = emp_server(7);
        server.set_rowset_cursors(false);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(EMP, CursorOptions::scroll_insensitive().with_fetch_size(3))
            .await
            .unwrap();

        let mut forward = Vec::new();
        while rs.next().await.unwrap() {
            forward.push(current_id(&rs).await);
        }
        assert_eq!(forward, vec![1, 2, 3, 4, 5, 6, 7]);
        assert!(rs.is_after_last().await.unwrap());

        let mut backward = Vec::new();
        while rs.previous().await.unwrap() {
            backward.push(current_id(&rs).await);
        }
        assert_eq!(backward, vec![7, 6, 5, 4, 3, 2, 1]);
        assert!(rs.is_before_first().await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_result() {
        let server = emp_server(0);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(EMP, CursorOptions::scroll_insensitive())
            .await
            .unwrap();

        assert!(!rs.next().await.unwrap());
        assert!(!rs.is_before_first().await.unwrap());
        assert!(!rs.is_after_last().await.unwrap());
        assert!(!rs.last().await.unwrap());
        assert_eq!(rs.get_row().await.unwrap(), 0);
    }
}

mod rowset_boundary_tests {
    use super::*;

    async fn open(server: &MemoryServer, fetch_size: u32) -> (Connection, ResultSet) {
        let conn = connect(server);
        let rs = conn
            .open_cursor(EMP, CursorOptions::scroll_insensitive().with_fetch_size(fetch_size))
            .await
            .unwrap();
        (conn, rs)
    }

    #[tokio::test]
    async fn test_previous_after_reaching_end_in_first_block() {
        let server = emp_server(1);
        let (_conn, rs) = open(&server, 2).await;

        assert!(!rs.previous().await.unwrap());
        assert!(rs.next().await.unwrap());
        rs.after_last().await.unwrap();
        assert!(rs.previous().await.unwrap());
        assert_eq!(current_id(&rs).await, 1);
    }

    #[tokio::test]
    async fn test_next_after_backing_out_of_first_rowset() {
        let server = emp_server(1);
        let (_conn, rs) = open(&server, 2).await;

        rs.after_last().await.unwrap();
        assert!(rs.previous().await.unwrap());
        assert!(!rs.previous().await.unwrap());
        assert!(rs.next().await.unwrap());
        assert_eq!(current_id(&rs).await, 1);
    }

    #[tokio::test]
    async fn test_previous_from_after_last_lands_on_last_row() {
        let server = emp_server(2);
        let (_conn, rs) = open(&server, 3).await;

        rs.before_first().await.unwrap();
        assert!(rs.absolute(2).await.unwrap());
        rs.after_last().await.unwrap();
        assert!(rs.previous().await.unwrap());
        assert_eq!(current_id(&rs).await, 2);
        assert_eq!(rs.get_row().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_backward_iteration_with_rowsets() {
        let server = emp_server(7);
        let (_conn, rs) = open(&server, 3).await;

        let mut forward = Vec::new();
        while rs.next().await.unwrap() {
            forward.push(current_id(&rs).await);
        }
        assert_eq!(forward, vec![1, 2, 3, 4, 5, 6, 7]);

        let mut backward = Vec::new();
        while rs.previous().await.unwrap() {
            backward.push(current_id(&rs).await);
        }
        assert_eq!(backward, vec![7, 6, 5, 4, 3, 2, 1]);
        assert!(rs.is_before_first().await.unwrap());

        assert!(rs.next().await.unwrap());
        assert_eq!(current_id(&rs).await, 1);
        assert!(!rs.previous().await.unwrap());
        assert!(rs.next().await.unwrap());
        assert_eq!(current_id(&rs).await, 1);
    }

    #[tokio::test]
    async fn test_relative_back_from_after_last() {
        let server = emp_server(7);
        let (_conn, rs) = open(&server, 3).await;

        rs.after_last().await.unwrap();
        assert!(rs.relative(-3).await.unwrap());
        assert_eq!(current_id(&rs).await, 5);

        rs.after_last().await.unwrap();
        assert!(rs.relative(-7).await.unwrap());
        assert_eq!(current_id(&rs).await, 1);

        rs.after_last().await.unwrap();
        assert!(!rs.relative(-8).await.unwrap());
        assert!(rs.is_before_first().await.unwrap());
        assert!(rs.next().await.unwrap());
        assert_eq!(current_id(&rs).await, 1);
    }
}

mod extreme_offset_tests {
    use super::*;

    #[tokio::test]
    async fn test_extreme_absolute_with_max_rows() {
        let server = emp_server(5);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(
                EMP,
                CursorOptions::scroll_insensitive()
                    .with_fetch_size(2)
                    .with_max_rows(3),
            )
            .await
            .unwrap();

        assert!(!rs.absolute(i64::MIN).await.unwrap());
        assert!(rs.is_before_first().await.unwrap());
        assert!(!rs.absolute(i64::MAX).await.unwrap());
        assert!(rs.is_after_last().await.unwrap());
    }

    #[tokio::test]
    async fn test_extreme_offsets() {
        let server = emp_server(5);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(EMP, CursorOptions::scroll_insensitive().with_fetch_size(2))
            .await
            .unwrap();

        assert!(rs.absolute(2).await.unwrap());
        assert!(!rs.relative(i64::MAX).await.unwrap());
        assert!(rs.is_after_last().await.unwrap());

        assert!(!rs.relative(i64::MIN).await.unwrap());
        assert!(rs.is_before_first().await.unwrap());

        assert!(!rs.absolute(i64::MAX).await.unwrap());
        assert!(rs.is_after_last().await.unwrap());
        assert!(!rs.absolute(i64::MIN).await.unwrap());
        assert!(rs.is_before_first().await.unwrap());

        assert!(rs.relative(3).await.unwrap());
        assert_eq!(current_id(&rs).await, 3);
    }
}

mod model_tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    enum Move {
        Next,
        Previous,
        First,
        Last,
        BeforeFirst,
        AfterLast,
        Absolute(i64),
        Relative(i64),
    }

    /// Where a move leaves a cursor over `rows` rows: 0 is before the
    /// first row, `rows + 1` after the last
    fn expected_position(position: i64, rows: i64, step: Move) -> i64 {
        let end = rows + 1;
        match step {
            Move::Next => (position + 1).min(end),
            Move::Previous => (position - 1).max(0),
            Move::First => 1,
            Move::Last => rows,
            Move::BeforeFirst => 0,
            Move::AfterLast => end,
            Move::Absolute(k) if k >= 0 => k.min(end),
            Move::Absolute(k) => (end + k).max(0),
            Move::Relative(k) => (position + k).clamp(0, end),
        }
    }

    /// Linear congruential generator; fixed seeds keep the sequences stable
    struct Lcg(u64);

    impl Lcg {
        fn below(&mut self, bound: u64) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (self.0 >> 33) % bound
        }

        fn step(&mut self, rows: i64) -> Move {
            match self.below(8) {
                0 => Move::Next,
                1 => Move::Previous,
                2 => Move::First,
                3 => Move::Last,
                4 => Move::BeforeFirst,
                5 => Move::AfterLast,
                6 => Move::Absolute(self.below(2 * rows as u64 + 5) as i64 - (rows + 2)),
                _ => Move::Relative(self.below(7) as i64 - 3),
            }
        }
    }

    async fn apply(rs: &ResultSet, step: Move) -> bool {
        match step {
            Move::Next => rs.next().await.unwrap(),
            Move::Previous => rs.previous().await.unwrap(),
            Move::First => rs.first().await.unwrap(),
            Move::Last => rs.last().await.unwrap(),
            Move::BeforeFirst => {
                rs.before_first().await.unwrap();
                false
            }
            Move::AfterLast => {
                rs.after_last().await.unwrap();
                false
            }
            Move::Absolute(k) => rs.absolute(k).await.unwrap(),
            Move::Relative(k) => rs.relative(k).await.unwrap(),
        }
    }

    #[tokio::test]
    async fn test_moves_match_position_model() {
        for rowset in [true, false] {
            for fetch_size in [1u32, 2, 3, 5] {
                for rows in [1, 2, 5] {
                    for seed in 0..8u64 {
                        let server = emp_server(rows);
                        server.set_rowset_cursors(rowset);
                        let conn = connect(&server);
                        let rs = conn
                            .open_cursor(
                                EMP,
                                CursorOptions::scroll_insensitive().with_fetch_size(fetch_size),
                            )
                            .await
                            .unwrap();

                        let mut rng = Lcg(seed * 7919 + rows as u64);
                        let mut position = 0;
                        let mut history = Vec::new();
                        for _ in 0..12 {
                            let step = rng.step(rows);
                            history.push(step);
                            position = expected_position(position, rows, step);
                            let on_row = position >= 1 && position <= rows;
                            let context = format!(
                                "rowset={} fetch_size={} rows={} moves={:?}",
                                rowset, fetch_size, rows, history
                            );

                            assert_eq!(apply(&rs, step).await, on_row, "{}", context);
                            if on_row {
                                assert_eq!(current_id(&rs).await, position, "{}", context);
                            } else {
                                assert!(
                                    matches!(
                                        rs.get_value(1).await,
                                        Err(Error::InvalidCursorPosition)
                                    ),
                                    "{}",
                                    context
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}

mod max_rows_tests {
    use super::*;

    #[tokio::test]
    async fn test_absolute_past_limit_is_after_last() {
        let server = emp_server(10);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(
                EMP,
                CursorOptions::scroll_insensitive()
                    .with_fetch_size(2)
                    .with_max_rows(5),
            )
            .await
            .unwrap();

        assert!(!rs.absolute(6).await.unwrap());
        assert!(rs.is_after_last().await.unwrap());
        assert_eq!(rs.get_row().await.unwrap(), 0);

        assert!(rs.absolute(5).await.unwrap());
        assert_eq!(current_id(&rs).await, 5);
        assert!(!rs.next().await.unwrap());
        assert!(rs.is_after_last().await.unwrap());

        assert!(!rs.absolute(-6).await.unwrap());
        assert!(rs.is_before_first().await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_size_bounded_by_limit() {
        let server = emp_server(10);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(EMP, CursorOptions::scroll_insensitive().with_max_rows(5))
            .await
            .unwrap();

        assert!(matches!(
            rs.set_fetch_size(6).await,
            Err(Error::InvalidFetchDirectionOrSize(_))
        ));
        assert!(matches!(
            rs.set_fetch_size(-1).await,
            Err(Error::InvalidFetchDirectionOrSize(_))
        ));
        rs.set_fetch_size(5).await.unwrap();
        assert_eq!(rs.fetch_size().await.unwrap(), 5);
    }
}

mod forward_only_tests {
    use super::*;

    #[tokio::test]
    async fn test_exhausted_cursor_has_no_row() {
        let server = emp_server(3);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(EMP, CursorOptions::new().with_fetch_size(2))
            .await
            .unwrap();

        let mut ids = Vec::new();
        while rs.next().await.unwrap() {
            ids.push(current_id(&rs).await);
            assert_eq!(rs.get_row().await.unwrap(), ids.len() as i64);
        }
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(rs.get_row().await.unwrap(), 0);
        assert!(!rs.next().await.unwrap());
        assert_eq!(server.open_cursor_count(), 0);
    }

    #[tokio::test]
    async fn test_scroll_operations_rejected() {
        let server = emp_server(3);
        let conn = connect(&server);
        let rs = conn.open_cursor(EMP, CursorOptions::new()).await.unwrap();

        assert!(matches!(rs.previous().await, Err(Error::NotScrollable)));
        assert!(matches!(rs.absolute(1).await, Err(Error::NotScrollable)));
        assert!(matches!(rs.last().await, Err(Error::NotScrollable)));
        assert!(matches!(
            rs.set_fetch_direction(FetchDirection::Reverse).await,
            Err(Error::InvalidFetchDirectionOrSize(_))
        ));
        rs.set_fetch_direction(FetchDirection::Forward).await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_cursor_rejects_calls() {
        let server = emp_server(3);
        let conn = connect(&server);
        let rs = conn.open_cursor(EMP, CursorOptions::new()).await.unwrap();
        rs.close().await.unwrap();

        assert!(rs.is_closed().await);
        assert!(matches!(rs.next().await, Err(Error::ClosedResultSet(_))));
        rs.close().await.unwrap();
    }
}

mod dynamic_tests {
    use super::*;

    fn dynamic() -> CursorOptions {
        CursorOptions::new()
            .with_type(ResultSetType::ScrollSensitive)
            .with_sensitivity(Sensitivity::SensitiveDynamic)
            .with_fetch_size(3)
    }

    #[tokio::test]
    async fn test_row_numbers_unavailable() {
        let server = emp_server(6);
        let conn = connect(&server);
        let rs = conn.open_cursor(EMP, dynamic()).await.unwrap();

        assert!(rs.next().await.unwrap());
        assert!(matches!(
            rs.get_row().await,
            Err(Error::InvalidForSensitiveDynamic)
        ));
        assert!(matches!(
            rs.absolute(-1).await,
            Err(Error::InvalidForSensitiveDynamic)
        ));
    }

    #[tokio::test]
    async fn test_moves_within_window() {
        let server = emp_server(6);
        let conn = connect(&server);
        let rs = conn.open_cursor(EMP, dynamic()).await.unwrap();
        let after_open = server.round_trips();

        assert!(rs.next().await.unwrap());
        assert!(rs.next().await.unwrap());
        assert!(rs.next().await.unwrap());
        assert_eq!(current_id(&rs).await, 3);
        assert!(rs.previous().await.unwrap());
        assert_eq!(current_id(&rs).await, 2);
        assert_eq!(server.round_trips(), after_open);
    }
}
