use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Local, NaiveDate};
use futures::{stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, Config, NoTls, Notification, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use staydesk::tenant::{TenantManager, TenantSettings};
use staydesk::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("staydesk_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(TenantSettings::new(dir)));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "staydesk".to_string(), None).await;
            });
        }
    });

    addr
}

async fn try_connect(
    addr: SocketAddr,
    user: &str,
) -> Result<(tokio_postgres::Client, mpsc::UnboundedReceiver<Notification>), tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("hotel_test")
        .user(user)
        .password("staydesk");

    let (client, mut connection) = config.connect(NoTls).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let stream = stream::poll_fn(move |cx| connection.poll_message(cx));
        futures::pin_mut!(stream);
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(AsyncMessage::Notification(n)) => {
                    let _ = tx.send(n);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    Ok((client, rx))
}

async fn connect(
    addr: SocketAddr,
    role: &str,
    id: Ulid,
) -> (tokio_postgres::Client, mpsc::UnboundedReceiver<Notification>) {
    try_connect(addr, &format!("{role}:{id}")).await.unwrap()
}

async fn recv_notification(
    rx: &mut mpsc::UnboundedReceiver<Notification>,
    timeout: Duration,
) -> Option<Notification> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
}

async fn rows(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn sqlstate(client: &tokio_postgres::Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.expect_err("statement should fail");
    err.code().map(|c| c.code().to_string()).unwrap_or_default()
}

fn days_ahead(n: u64) -> NaiveDate {
    Local::now().date_naive() + Days::new(n)
}

async fn create_room(host: &tokio_postgres::Client, owner: Ulid) -> Ulid {
    let room = Ulid::new();
    host.batch_execute(&format!(
        "INSERT INTO rooms (id, hotel_id, owner_id, base_rate, capacity, beds) \
         VALUES ('{room}', '{}', '{owner}', 100, 2, 1)",
        Ulid::new()
    ))
    .await
    .unwrap();
    room
}

fn nightly_insert(room: Ulid, check_in: NaiveDate, check_out: NaiveDate) -> String {
    format!(
        "INSERT INTO reservations (id, room_id, check_in, check_out, guest_count, guest_name, \
         guest_surname, guest_document, guest_phone) VALUES ('{}', '{room}', '{check_in}', \
         '{check_out}', 2, 'Ana', 'Quispe', '44556677', '999888777')",
        Ulid::new()
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn book_and_read_back() {
    let addr = start_test_server().await;
    let host_id = Ulid::new();
    let guest_id = Ulid::new();
    let (host, _) = connect(addr, "host", host_id).await;
    let (guest, _) = connect(addr, "guest", guest_id).await;
    let room = create_room(&host, host_id).await;

    let created = rows(&guest, &nightly_insert(room, days_ahead(10), days_ahead(12))).await;
    assert_eq!(created.len(), 1);
    let code = created[0].get("code").unwrap().to_string();
    assert!(code.starts_with("RES-"));
    assert_eq!(created[0].get("status"), Some("pendiente"));
    assert_eq!(created[0].get("subtotal"), Some("200"));
    assert_eq!(created[0].get("tax"), Some("36"));
    assert_eq!(created[0].get("total"), Some("236"));
    assert_eq!(created[0].get("guest_id"), Some(guest_id.to_string().as_str()));

    let by_code = rows(&host, &format!("SELECT * FROM reservations WHERE code = '{code}'")).await;
    assert_eq!(by_code.len(), 1);
    assert_eq!(by_code[0].get("id"), created[0].get("id"));

    let mine = rows(&guest, "SELECT * FROM reservations").await;
    assert_eq!(mine.len(), 1);
}

#[tokio::test]
async fn overlapping_booking_is_rejected() {
    let addr = start_test_server().await;
    let host_id = Ulid::new();
    let (host, _) = connect(addr, "host", host_id).await;
    let (guest, _) = connect(addr, "guest", Ulid::new()).await;
    let room = create_room(&host, host_id).await;

    rows(&guest, &nightly_insert(room, days_ahead(5), days_ahead(8))).await;
    assert_eq!(
        sqlstate(&guest, &nightly_insert(room, days_ahead(7), days_ahead(9))).await,
        "23P01"
    );
    // back-to-back is fine
    rows(&guest, &nightly_insert(room, days_ahead(8), days_ahead(9))).await;
}

#[tokio::test]
async fn invalid_requests_map_to_distinct_states() {
    let addr = start_test_server().await;
    let host_id = Ulid::new();
    let (host, _) = connect(addr, "host", host_id).await;
    let (guest, _) = connect(addr, "guest", Ulid::new()).await;
    let room = create_room(&host, host_id).await;

    // checkout before checkin
    assert_eq!(
        sqlstate(&guest, &nightly_insert(room, days_ahead(5), days_ahead(5))).await,
        "22023"
    );
    // 31 nights
    assert_eq!(
        sqlstate(&guest, &nightly_insert(room, days_ahead(5), days_ahead(36))).await,
        "22008"
    );
    // two hours of day use
    let short = format!(
        "INSERT INTO day_use_reservations (id, room_id, \"date\", time_from, time_to, guest_count, \
         guest_name, guest_surname, guest_document, guest_phone) VALUES ('{}', '{room}', '{}', \
         '10:00', '12:00', 1, 'Ana', 'Quispe', '44556677', '999888777')",
        Ulid::new(),
        days_ahead(3)
    );
    assert_eq!(sqlstate(&guest, &short).await, "22008");
    // three guests in a double
    let crowded = nightly_insert(room, days_ahead(5), days_ahead(6)).replace(", 2, 'Ana'", ", 3, 'Ana'");
    assert_eq!(sqlstate(&guest, &crowded).await, "23514");
    // unknown room
    assert_eq!(
        sqlstate(&guest, &nightly_insert(Ulid::new(), days_ahead(5), days_ahead(6))).await,
        "P0002"
    );
    // garbage
    assert_eq!(sqlstate(&guest, "SELECT * FROM bookings").await, "42601");
}

#[tokio::test]
async fn lifecycle_over_the_wire() {
    let addr = start_test_server().await;
    let host_id = Ulid::new();
    let (host, _) = connect(addr, "host", host_id).await;
    let (guest, _) = connect(addr, "guest", Ulid::new()).await;
    let (stranger, _) = connect(addr, "host", Ulid::new()).await;
    let room = create_room(&host, host_id).await;

    let created = rows(&guest, &nightly_insert(room, days_ahead(20), days_ahead(22))).await;
    let id = created[0].get("id").unwrap().to_string();

    // the guest cannot confirm, nor can another hotel's host
    let confirm = format!("UPDATE reservations SET status = 'confirmada' WHERE id = '{id}'");
    assert_eq!(sqlstate(&guest, &confirm).await, "42501");
    assert_eq!(sqlstate(&stranger, &confirm).await, "42501");

    let confirmed = rows(&host, &confirm).await;
    assert_eq!(confirmed[0].get("status"), Some("confirmada"));

    let complete = format!("UPDATE reservations SET status = 'completada' WHERE id = '{id}'");
    assert_eq!(rows(&host, &complete).await[0].get("status"), Some("completada"));

    let cancel = format!(
        "UPDATE reservations SET status = 'cancelada', cancel_reason = 'late' WHERE id = '{id}'"
    );
    assert_eq!(sqlstate(&guest, &cancel).await, "55000");
}

#[tokio::test]
async fn guest_cancels_and_frees_the_nights() {
    let addr = start_test_server().await;
    let host_id = Ulid::new();
    let (host, _) = connect(addr, "host", host_id).await;
    let (guest, _) = connect(addr, "guest", Ulid::new()).await;
    let room = create_room(&host, host_id).await;

    let created = rows(&guest, &nightly_insert(room, days_ahead(3), days_ahead(5))).await;
    let id = created[0].get("id").unwrap().to_string();
    let cancelled = rows(
        &guest,
        &format!(
            "UPDATE reservations SET status = 'cancelada', cancel_reason = 'cambio de planes' WHERE id = '{id}'"
        ),
    )
    .await;
    assert_eq!(cancelled[0].get("status"), Some("cancelada"));
    assert_eq!(cancelled[0].get("cancel_reason"), Some("cambio de planes"));
    assert!(cancelled[0].get("cancelled_at").is_some());

    rows(&guest, &nightly_insert(room, days_ahead(3), days_ahead(5))).await;
}

#[tokio::test]
async fn availability_and_quotes() {
    let addr = start_test_server().await;
    let host_id = Ulid::new();
    let (host, _) = connect(addr, "host", host_id).await;
    let (guest, _) = connect(addr, "guest", Ulid::new()).await;
    let room = create_room(&host, host_id).await;

    let (from, to) = (days_ahead(10), days_ahead(20));
    rows(&guest, &nightly_insert(room, days_ahead(12), days_ahead(14))).await;

    let free = rows(
        &guest,
        &format!(
            "SELECT * FROM availability WHERE room_id = '{room}' AND start >= '{from}' AND \"end\" <= '{to}'"
        ),
    )
    .await;
    let ranges: Vec<(String, String)> = free
        .iter()
        .map(|r| (r.get("start").unwrap().to_string(), r.get("end").unwrap().to_string()))
        .collect();
    assert_eq!(
        ranges,
        vec![
            (from.to_string(), days_ahead(12).to_string()),
            (days_ahead(14).to_string(), to.to_string()),
        ]
    );

    let quote = rows(
        &guest,
        &format!(
            "SELECT * FROM quotes WHERE room_id = '{room}' AND check_in = '{}' AND check_out = '{}'",
            days_ahead(13),
            days_ahead(15)
        ),
    )
    .await;
    assert_eq!(quote[0].get("total"), Some("236"));
    assert_eq!(quote[0].get("available"), Some("f"));

    let day_use = rows(
        &guest,
        &format!(
            "SELECT * FROM quotes WHERE room_id = '{room}' AND \"date\" = '{}' AND time_from = '09:00' AND time_to = '13:00'",
            days_ahead(30)
        ),
    )
    .await;
    // 4h * 100 * 0.40 = 160, 160 * 1.18 = 188.8 -> 189
    assert_eq!(day_use[0].get("subtotal"), Some("160.00"));
    assert_eq!(day_use[0].get("total"), Some("189"));
    assert_eq!(day_use[0].get("available"), Some("t"));
}

#[tokio::test]
async fn room_update_and_stats() {
    let addr = start_test_server().await;
    let host_id = Ulid::new();
    let (host, _) = connect(addr, "host", host_id).await;
    let (guest, _) = connect(addr, "guest", Ulid::new()).await;
    let room = create_room(&host, host_id).await;

    let created = rows(&guest, &nightly_insert(room, days_ahead(3), days_ahead(5))).await;
    let id = created[0].get("id").unwrap().to_string();
    rows(&host, &format!("UPDATE reservations SET status = 'confirmada' WHERE id = '{id}'")).await;

    host.batch_execute(&format!("UPDATE rooms SET status = 'maintenance' WHERE id = '{room}'"))
        .await
        .unwrap();
    let listed = rows(&host, &format!("SELECT * FROM rooms WHERE id = '{room}'")).await;
    assert_eq!(listed[0].get("status"), Some("maintenance"));
    assert_eq!(
        sqlstate(&guest, &nightly_insert(room, days_ahead(8), days_ahead(9))).await,
        "55006"
    );
    assert_eq!(
        sqlstate(&guest, &format!("UPDATE rooms SET base_rate = 1 WHERE id = '{room}'")).await,
        "42501"
    );

    let stats = rows(&host, "SELECT * FROM stats").await;
    assert_eq!(stats[0].get("confirmada"), Some("1"));
    assert_eq!(stats[0].get("total"), Some("1"));
    assert_eq!(stats[0].get("revenue"), Some("236"));
    assert_eq!(stats[0].get("currency"), Some("PEN"));
}

#[tokio::test]
async fn listener_receives_booking_notification() {
    let addr = start_test_server().await;
    let host_id = Ulid::new();
    let (host, mut host_rx) = connect(addr, "host", host_id).await;
    let (guest, _) = connect(addr, "guest", Ulid::new()).await;
    let room = create_room(&host, host_id).await;

    host.batch_execute(&format!("LISTEN room_{room}")).await.unwrap();
    rows(&guest, &nightly_insert(room, days_ahead(3), days_ahead(4))).await;

    // delivered ahead of the listener's next statement
    host.simple_query("SELECT * FROM rooms").await.unwrap();
    let notif = recv_notification(&mut host_rx, Duration::from_secs(5))
        .await
        .expect("expected notification");
    assert_eq!(notif.channel(), format!("room_{room}"));

    let payload: serde_json::Value = serde_json::from_str(notif.payload()).unwrap();
    assert_eq!(payload["event"], "ReservationCreated");
    assert_eq!(payload["room_id"], room.to_string());
    assert_eq!(payload["total"], "236");
    assert_eq!(payload["currency"], "PEN");
}

#[tokio::test]
async fn own_changes_are_notified_with_the_result() {
    let addr = start_test_server().await;
    let host_id = Ulid::new();
    let (host, mut rx) = connect(addr, "host", host_id).await;
    let (guest, _) = connect(addr, "guest", Ulid::new()).await;
    let room = create_room(&host, host_id).await;
    let created = rows(&guest, &nightly_insert(room, days_ahead(3), days_ahead(4))).await;
    let id = created[0].get("id").unwrap().to_string();

    host.batch_execute("LISTEN reservations").await.unwrap();
    rows(&host, &format!("UPDATE reservations SET status = 'confirmada' WHERE id = '{id}'")).await;

    let notif = recv_notification(&mut rx, Duration::from_secs(5))
        .await
        .expect("expected notification");
    assert_eq!(notif.channel(), "reservations");
    let payload: serde_json::Value = serde_json::from_str(notif.payload()).unwrap();
    assert_eq!(payload["event"], "ReservationConfirmed");
    assert_eq!(payload["reservation_id"], id);
}

#[tokio::test]
async fn unlisten_stops_notifications() {
    let addr = start_test_server().await;
    let host_id = Ulid::new();
    let (host, mut rx) = connect(addr, "host", host_id).await;
    let (guest, _) = connect(addr, "guest", Ulid::new()).await;
    let room = create_room(&host, host_id).await;

    host.batch_execute(&format!("LISTEN room_{room}")).await.unwrap();
    host.batch_execute(&format!("LISTEN room_{room}")).await.unwrap();
    rows(&guest, &nightly_insert(room, days_ahead(3), days_ahead(4))).await;
    host.simple_query("SELECT * FROM rooms").await.unwrap();
    assert!(recv_notification(&mut rx, Duration::from_secs(5)).await.is_some());
    // listening twice does not duplicate delivery
    assert!(recv_notification(&mut rx, Duration::from_millis(300)).await.is_none());

    host.batch_execute("UNLISTEN *").await.unwrap();
    rows(&guest, &nightly_insert(room, days_ahead(6), days_ahead(7))).await;
    host.simple_query("SELECT * FROM rooms").await.unwrap();
    assert!(recv_notification(&mut rx, Duration::from_millis(500)).await.is_none());
}

#[tokio::test]
async fn bad_channel_is_rejected() {
    let addr = start_test_server().await;
    let (host, _) = connect(addr, "host", Ulid::new()).await;
    assert_eq!(sqlstate(&host, "LISTEN room_nope").await, "42602");
}

#[tokio::test]
async fn malformed_user_cannot_connect() {
    let addr = start_test_server().await;
    assert!(try_connect(addr, "staydesk").await.is_err());
    assert!(try_connect(addr, "guest:not-a-ulid").await.is_err());
}
