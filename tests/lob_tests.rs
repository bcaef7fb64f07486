//! Tests for LOB locator lifetimes on scrollable cursors
//!
//! These tests verify that locators the application never took are
//! released when the cursor moves on, that published locators are left
//! alone, and that rows are refetched rather than reused once their
//! locators may be gone.

use netcursor::{
    ColumnInfo, Config, Connection, CursorOptions, Error, LobKind, MemoryServer, ResultSet,
    Value,
};

const DOCS: &str = "SELECT ID, DOC FROM APP.DOCS";

fn docs_server(rows: i64) -> MemoryServer {
    let server = MemoryServer::new();
    server.add_table(
        DOCS,
        vec![
            ColumnInfo::new("ID").with_table("APP", "DOCS"),
            ColumnInfo::new("DOC")
                .with_table("APP", "DOCS")
                .with_lob(LobKind::Clob),
        ],
        (1..=rows)
            .map(|id| vec![Value::Integer(id), Value::from(format!("doc{}", id))])
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

async fn locator_id(rs: &ResultSet) -> u32 {
    match rs.get_value(2).await.unwrap() {
        Value::Lob(locator) => locator.locator_id,
        other => panic!("expected a locator, got {:?}", other),
    }
}

mod release_tests {
    use super::*;

    #[tokio::test]
    async fn test_untaken_locator_released_on_move() {
        let server = docs_server(3);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(DOCS, CursorOptions::scroll_insensitive())
            .await
            .unwrap();
        assert_eq!(server.live_locator_count(), 3);

        assert!(rs.next().await.unwrap());
        let before = server.round_trips();
        assert!(rs.next().await.unwrap());

        assert_eq!(server.round_trips(), before + 1);
        assert_eq!(server.released_locator_count(), 1);
        assert_eq!(server.live_locator_count(), 2);
    }

    #[tokio::test]
    async fn test_published_locator_survives_move() {
        let server = docs_server(3);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(DOCS, CursorOptions::scroll_insensitive())
            .await
            .unwrap();

        assert!(rs.next().await.unwrap());
        let lob = rs.get_lob(2).await.unwrap();
        assert!(matches!(lob, Value::Lob(ref locator) if locator.kind == LobKind::Clob));
        assert!(rs.next().await.unwrap());

        assert_eq!(server.released_locator_count(), 0);
        assert_eq!(server.live_locator_count(), 3);
    }

    #[tokio::test]
    async fn test_close_releases_untaken_locators() {
        let server = docs_server(2);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(DOCS, CursorOptions::scroll_insensitive())
            .await
            .unwrap();
        assert!(rs.next().await.unwrap());

        rs.close().await.unwrap();
        assert_eq!(server.released_locator_count(), 1);
        assert_eq!(server.open_cursor_count(), 0);
    }
}

mod access_tests {
    use super::*;

    #[tokio::test]
    async fn test_lob_read_once_per_row() {
        let server = docs_server(2);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(DOCS, CursorOptions::scroll_insensitive())
            .await
            .unwrap();
        assert!(rs.next().await.unwrap());

        rs.get_lob(2).await.unwrap();
        assert!(matches!(
            rs.get_lob(2).await,
            Err(Error::LobAlreadyStreamed(2))
        ));
        assert!(matches!(rs.get_lob(1).await, Err(Error::NotALobColumn(1))));

        assert!(rs.next().await.unwrap());
        rs.get_lob(2).await.unwrap();
    }

    #[tokio::test]
    async fn test_inline_values_without_locators() {
        let server = docs_server(2);
        let conn = Connection::new(
            Box::new(server.transport()),
            Config::new()
                .with_auto_commit(false)
                .with_lob_locators(false),
        );
        let rs = conn
            .open_cursor(DOCS, CursorOptions::scroll_insensitive())
            .await
            .unwrap();
        assert_eq!(server.live_locator_count(), 0);

        assert!(rs.next().await.unwrap());
        assert_eq!(rs.get_lob(2).await.unwrap(), Value::from("doc1"));
        assert!(matches!(
            rs.get_lob(2).await,
            Err(Error::LobAlreadyStreamed(2))
        ));
    }
}

mod refetch_tests {
    use super::*;

    #[tokio::test]
    async fn test_revisited_row_is_refetched() {
        let server = docs_server(3);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(DOCS, CursorOptions::scroll_insensitive())
            .await
            .unwrap();

        assert!(rs.next().await.unwrap());
        let first_visit = locator_id(&rs).await;
        assert!(rs.next().await.unwrap());

        let before = server.round_trips();
        assert!(rs.previous().await.unwrap());
        // release of row 2's locator, then the refetch
        assert_eq!(server.round_trips(), before + 2);
        assert_eq!(rs.get_value(1).await.unwrap(), Value::Integer(1));
        assert_ne!(locator_id(&rs).await, first_visit);
    }

    #[tokio::test]
    async fn test_commit_discards_locators() {
        let server = docs_server(3);
        let conn = connect(&server);
        let rs = conn
            .open_cursor(DOCS, CursorOptions::scroll_insensitive())
            .await
            .unwrap();
        assert!(rs.next().await.unwrap());
        // locator row 2 carried in the first block
        let cached = locator_id(&rs).await + 1;

        conn.commit().await.unwrap();
        assert_eq!(server.live_locator_count(), 0);

        let before = server.round_trips();
        assert!(rs.next().await.unwrap());
        assert_eq!(server.round_trips(), before + 1);
        assert_eq!(server.released_locator_count(), 0);
        assert_eq!(rs.get_value(1).await.unwrap(), Value::Integer(2));
        assert_ne!(locator_id(&rs).await, cached);
    }
}
