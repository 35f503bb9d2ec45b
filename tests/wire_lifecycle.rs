use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use borrowd::config::EngineConfig;
use borrowd::tenant::TenantManager;
use borrowd::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("borrowd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, EngineConfig::default()));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "borrowd".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect(addr: SocketAddr, dbname: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(dbname)
        .user("librarian")
        .password("borrowd");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

fn rows(messages: Vec<SimpleQueryMessage>) -> Vec<SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn submit(client: &Client, user: Ulid, item: Ulid, start: &str, end: &str) -> String {
    let out = client
        .simple_query(&format!(
            r#"INSERT INTO borrow_requests (user_id, item_id, start, "end") VALUES ('{user}', '{item}', '{start}', '{end}')"#
        ))
        .await
        .unwrap();
    let rows = rows(out);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("status"), Some("pending"));
    rows[0].get("id").unwrap().to_string()
}

fn sqlstate(err: &tokio_postgres::Error) -> Option<&str> {
    err.code().map(|c| c.code())
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn borrow_lifecycle_over_the_wire() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "library").await;
    let user = Ulid::new();
    let item = Ulid::new();

    let r1 = submit(&client, user, item, "2024-01-01", "2024-01-05").await;
    let r2 = submit(&client, user, item, "2024-01-03", "2024-01-04").await;

    let approved = rows(
        client
            .simple_query(&format!("INSERT INTO approvals (request_id) VALUES ('{r1}')"))
            .await
            .unwrap(),
    );
    assert_eq!(approved[0].get("status"), Some("approved"));
    assert_eq!(approved[0].get("start"), Some("2024-01-01"));

    let err = client
        .simple_query(&format!("INSERT INTO approvals (request_id) VALUES ('{r2}')"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("23P01"));

    let denied = rows(
        client
            .simple_query(&format!("INSERT INTO denials (request_id) VALUES ('{r2}')"))
            .await
            .unwrap(),
    );
    assert_eq!(denied[0].get("status"), Some("denied"));

    let err = client
        .simple_query(&format!("INSERT INTO denials (request_id) VALUES ('{r2}')"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("55000"));

    let listed = rows(
        client
            .simple_query(&format!("SELECT * FROM borrow_requests WHERE item_id = '{item}'"))
            .await
            .unwrap(),
    );
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].get("id"), Some(r1.as_str()));

    let archived = rows(
        client
            .simple_query(&format!("INSERT INTO borrow_history (request_id) VALUES ('{r1}')"))
            .await
            .unwrap(),
    );
    assert_eq!(archived[0].get("request_id"), Some(r1.as_str()));
    let user_str = user.to_string();
    assert_eq!(archived[0].get("user_id"), Some(user_str.as_str()));

    let history = rows(
        client
            .simple_query(&format!("SELECT * FROM borrow_history WHERE user_id = '{user}'"))
            .await
            .unwrap(),
    );
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].get("end"), Some("2024-01-05"));
}

#[tokio::test]
async fn client_errors_map_to_sqlstates() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "library").await;

    let err = client
        .simple_query(&format!(
            r#"INSERT INTO borrow_requests (user_id, item_id, start, "end") VALUES ('{}', '{}', '2024-05-10', '2024-05-05')"#,
            Ulid::new(),
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("22023"));

    let err = client
        .simple_query(&format!(
            r#"INSERT INTO borrow_requests (user_id, item_id, start) VALUES ('{}', '{}', '2024-05-10')"#,
            Ulid::new(),
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("22023"));

    let err = client
        .simple_query(&format!("INSERT INTO approvals (request_id) VALUES ('{}')", Ulid::new()))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("P0002"));

    let err = client.simple_query("DROP TABLE borrow_requests").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("42601"));
}

#[tokio::test]
async fn databases_are_separate_libraries() {
    let (addr, _tm) = start_test_server().await;
    let north = connect(addr, "north").await;
    let south = connect(addr, "south").await;
    let item = Ulid::new();

    submit(&north, Ulid::new(), item, "2024-02-01", "2024-02-02").await;

    let listed = rows(south.simple_query("SELECT * FROM borrow_requests").await.unwrap());
    assert!(listed.is_empty());
    let listed = rows(north.simple_query("SELECT * FROM borrow_requests").await.unwrap());
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn listen_validates_channel() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "library").await;

    client
        .batch_execute(&format!("LISTEN item_{}", Ulid::new()))
        .await
        .unwrap();
    assert!(client.batch_execute("LISTEN shelf_1").await.is_err());
}
