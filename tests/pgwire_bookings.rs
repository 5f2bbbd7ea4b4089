use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};

use roombook::engine::Engine;
use roombook::service::BookingService;
use roombook::validate::ValidationPolicy;
use roombook::wire::{self, RoombookFactory};

// ── Test infrastructure ──────────────────────────────────────

static SERVERS: AtomicUsize = AtomicUsize::new(0);

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!(
        "roombook_int_test_{}_{}",
        std::process::id(),
        SERVERS.fetch_add(1, Ordering::Relaxed)
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Engine::new(dir.join("roombook.wal")).unwrap();
    let service = BookingService::new(Arc::new(engine), ValidationPolicy::default());
    let factory = Arc::new(RoombookFactory::new(service));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let factory = factory.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, factory).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("roombook")
        .user("roombook");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn sqlstate(client: &Client, sql: &str) -> SqlState {
    let err = client.simple_query(sql).await.unwrap_err();
    err.code().cloned().unwrap_or_else(|| panic!("no SQLSTATE for {sql}: {err}"))
}

async fn create_room(client: &Client, name: &str) -> String {
    let created = rows(client, &format!("INSERT INTO rooms (name) VALUES ('{name}')")).await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].get("name"), Some(name));
    created[0].get("id").unwrap().to_string()
}

fn insert_booking(room: &str, start: &str, end: &str) -> String {
    format!(
        "INSERT INTO bookings (room_id, start_time, end_time) VALUES ({room}, '{start}', '{end}')"
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_lifecycle_over_pgwire() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let room = create_room(&client, "Conference Room A").await;

    let first = rows(
        &client,
        &insert_booking(&room, "2099-01-01T10:00:00Z", "2099-01-01T11:00:00Z"),
    )
    .await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].get("room_id"), Some(room.as_str()));
    assert_eq!(first[0].get("start_time"), Some("2099-01-01T10:00:00.000Z"));
    assert_eq!(first[0].get("end_time"), Some("2099-01-01T11:00:00.000Z"));
    let first_id = first[0].get("id").unwrap().to_string();

    let code = sqlstate(
        &client,
        &insert_booking(&room, "2099-01-01T10:30:00Z", "2099-01-01T11:30:00Z"),
    )
    .await;
    assert_eq!(code, SqlState::EXCLUSION_VIOLATION);

    // Shared endpoint is not an overlap; an earlier slot lists first.
    rows(
        &client,
        &insert_booking(&room, "2099-01-01T11:00:00Z", "2099-01-01T12:00:00Z"),
    )
    .await;
    rows(
        &client,
        &insert_booking(&room, "2099-01-01T08:00:00Z", "2099-01-01T09:00:00Z"),
    )
    .await;

    let listed = rows(
        &client,
        &format!("SELECT * FROM bookings WHERE room_id = {room}"),
    )
    .await;
    let starts: Vec<&str> = listed.iter().map(|r| r.get("start_time").unwrap()).collect();
    assert_eq!(
        starts,
        vec![
            "2099-01-01T08:00:00.000Z",
            "2099-01-01T10:00:00.000Z",
            "2099-01-01T11:00:00.000Z",
        ]
    );

    let delete = format!("DELETE FROM bookings WHERE id = {first_id}");
    client.simple_query(&delete).await.unwrap();
    assert_eq!(sqlstate(&client, &delete).await, SqlState::NO_DATA_FOUND);

    // The freed slot can be booked again.
    let rebooked = rows(
        &client,
        &insert_booking(&room, "2099-01-01T10:00:00Z", "2099-01-01T11:00:00Z"),
    )
    .await;
    assert_eq!(rebooked.len(), 1);
    assert_ne!(rebooked[0].get("id"), Some(first_id.as_str()));
}

#[tokio::test]
async fn errors_map_to_sqlstates() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let room = create_room(&client, "Focus").await;

    let backwards = insert_booking(&room, "2099-01-01T11:00:00Z", "2099-01-01T10:00:00Z");
    assert_eq!(
        sqlstate(&client, &backwards).await,
        SqlState::INVALID_PARAMETER_VALUE
    );

    let past = insert_booking(&room, "2001-01-01T10:00:00Z", "2001-01-01T11:00:00Z");
    assert_eq!(
        sqlstate(&client, &past).await,
        SqlState::INVALID_PARAMETER_VALUE
    );

    let unaligned = insert_booking(&room, "2099-01-01T10:00:30Z", "2099-01-01T11:00:00Z");
    assert_eq!(
        sqlstate(&client, &unaligned).await,
        SqlState::INVALID_PARAMETER_VALUE
    );

    let unknown_room = insert_booking("999", "2099-01-01T10:00:00Z", "2099-01-01T11:00:00Z");
    assert_eq!(
        sqlstate(&client, &unknown_room).await,
        SqlState::NO_DATA_FOUND
    );
    assert_eq!(
        sqlstate(&client, "SELECT * FROM bookings WHERE room_id = 999").await,
        SqlState::NO_DATA_FOUND
    );

    assert_eq!(
        sqlstate(&client, "INSERT INTO rooms (name) VALUES ('Focus')").await,
        SqlState::UNIQUE_VIOLATION
    );
    assert_eq!(
        sqlstate(&client, "SELEKT * FROM rooms").await,
        SqlState::SYNTAX_ERROR
    );
}

#[tokio::test]
async fn rooms_listed_and_deleted() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let a = create_room(&client, "Room A").await;
    let b = create_room(&client, "Room B").await;
    rows(
        &client,
        &insert_booking(&a, "2099-03-01T09:00:00Z", "2099-03-01T10:00:00Z"),
    )
    .await;

    let listed = rows(&client, "SELECT * FROM rooms").await;
    let names: Vec<&str> = listed.iter().map(|r| r.get("name").unwrap()).collect();
    assert_eq!(names, vec!["Room A", "Room B"]);

    client
        .simple_query(&format!("DELETE FROM rooms WHERE id = {a}"))
        .await
        .unwrap();
    let listed = rows(&client, "SELECT * FROM rooms").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("id"), Some(b.as_str()));
    assert_eq!(
        sqlstate(&client, &format!("SELECT * FROM bookings WHERE room_id = {a}")).await,
        SqlState::NO_DATA_FOUND
    );
}

#[tokio::test]
async fn extended_protocol_binds_text_params() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let room = create_room(&client, "Studio").await;

    let inserted = client
        .execute(
            "INSERT INTO bookings (room_id, start_time, end_time) VALUES ($1, $2, $3)",
            &[&room.as_str(), &"2099-05-01T14:00:00Z", &"2099-05-01T15:00:00Z"],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let listed = rows(
        &client,
        &format!("SELECT * FROM bookings WHERE room_id = {room}"),
    )
    .await;
    assert_eq!(listed.len(), 1);
    let id = listed[0].get("id").unwrap();

    let deleted = client
        .execute("DELETE FROM bookings WHERE id = $1", &[&id])
        .await
        .unwrap();
    assert_eq!(deleted, 1);
}
