use std::thread;
use std::time::{Duration, Instant};

use meteor::net::MSG_FIRST_USER;
use meteor::{Address, Message, Session, SessionState};

#[derive(Default)]
struct Inbox {
    texts: Vec<String>,
}

fn localhost(port: u16) -> Address {
    format!("127.0.0.1:{}", port).parse().unwrap()
}

fn text_session(max_connections: usize) -> Session<Inbox> {
    let mut session = Session::new(max_connections);
    assert!(session.register_handler(MSG_FIRST_USER, |_session, inbox: &mut Inbox, msg| {
        if let Some(Some(text)) = msg.read_str() {
            inbox.texts.push(text);
        }
    }));
    session
}

fn text_message(text: &str) -> Message {
    let mut msg = Message::new(MSG_FIRST_USER);
    msg.write_str(Some(text));
    msg
}

/// Tick a set of sessions until `done` reports true or a deadline passes.
fn pump<C>(
    sessions: &mut [(&mut Session<C>, &mut C)],
    mut done: impl FnMut(&[(&mut Session<C>, &mut C)]) -> bool,
) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        for (session, ctx) in sessions.iter_mut() {
            session.update(ctx);
        }
        if done(sessions) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn test_join_handshake_assigns_host_slots() {
    let mut host: Session<()> = Session::new(8);
    host.host(0).unwrap();
    assert_eq!(host.state(), SessionState::Connected);
    assert_eq!(host.self_slot(), Some(0));
    let port = host.local_port().unwrap();

    let mut first: Session<()> = Session::new(8);
    first.join(localhost(port)).unwrap();
    assert_eq!(first.state(), SessionState::Connecting);
    assert!(first.is_running());
    assert!(first.is_client());
    assert!(!first.is_ready());

    let mut ctx = ();
    let mut first_ctx = ();
    let ok = pump(
        &mut [(&mut host, &mut ctx), (&mut first, &mut first_ctx)],
        |sessions| sessions[1].0.is_ready(),
    );
    assert!(ok, "first client never became ready");
    assert_eq!(first.self_slot(), Some(1));

    // A second joiner lands on the next host slot and learns it through the
    // same handshake.
    let mut second: Session<()> = Session::new(8);
    second.join(localhost(port)).unwrap();

    let mut second_ctx = ();
    let ok = pump(
        &mut [
            (&mut host, &mut ctx),
            (&mut first, &mut first_ctx),
            (&mut second, &mut second_ctx),
        ],
        |sessions| sessions[2].0.is_ready(),
    );
    assert!(ok, "second client never became ready");
    assert_eq!(second.self_slot(), Some(2));

    // Host sees itself plus both clients.
    assert_eq!(host.connections().count(), 3);
    assert!(host.is_host());
    assert!(!host.is_client());
}

#[test]
fn test_send_to_others_reaches_peers_not_self() {
    let mut host = text_session(8);
    let mut host_inbox = Inbox::default();
    host.host(0).unwrap();
    let port = host.local_port().unwrap();

    let mut a = text_session(8);
    let mut a_inbox = Inbox::default();
    a.join(localhost(port)).unwrap();
    let mut b = text_session(8);
    let mut b_inbox = Inbox::default();
    b.join(localhost(port)).unwrap();

    let ok = pump(
        &mut [
            (&mut host, &mut host_inbox),
            (&mut a, &mut a_inbox),
            (&mut b, &mut b_inbox),
        ],
        |sessions| sessions[1].0.is_ready() && sessions[2].0.is_ready(),
    );
    assert!(ok, "clients never became ready");

    host.send_to_others(&text_message("supernova"));

    let ok = pump(
        &mut [
            (&mut host, &mut host_inbox),
            (&mut a, &mut a_inbox),
            (&mut b, &mut b_inbox),
        ],
        |sessions| !sessions[1].1.texts.is_empty() && !sessions[2].1.texts.is_empty(),
    );
    assert!(ok, "broadcast never arrived");

    assert_eq!(a_inbox.texts, vec!["supernova".to_string()]);
    assert_eq!(b_inbox.texts, vec!["supernova".to_string()]);
    // The host's own loopback connection is excluded from the broadcast.
    assert!(host_inbox.texts.is_empty());
}

#[test]
fn test_client_broadcast_reaches_only_host() {
    let mut host = text_session(8);
    let mut host_inbox = Inbox::default();
    host.host(0).unwrap();
    let port = host.local_port().unwrap();

    let mut a = text_session(8);
    let mut a_inbox = Inbox::default();
    a.join(localhost(port)).unwrap();
    let mut b = text_session(8);
    let mut b_inbox = Inbox::default();
    b.join(localhost(port)).unwrap();

    let ok = pump(
        &mut [
            (&mut host, &mut host_inbox),
            (&mut a, &mut a_inbox),
            (&mut b, &mut b_inbox),
        ],
        |sessions| sessions[1].0.is_ready() && sessions[2].0.is_ready(),
    );
    assert!(ok);

    // A client's only non-self connection is the host; peers do not hear it.
    a.send_to_others(&text_message("ping from a"));

    let ok = pump(
        &mut [
            (&mut host, &mut host_inbox),
            (&mut a, &mut a_inbox),
            (&mut b, &mut b_inbox),
        ],
        |sessions| !sessions[0].1.texts.is_empty(),
    );
    assert!(ok, "host never heard the client");

    assert_eq!(host_inbox.texts, vec!["ping from a".to_string()]);
    assert!(a_inbox.texts.is_empty());
    assert!(b_inbox.texts.is_empty());
}

#[test]
fn test_full_session_drops_extra_joiner() {
    // Two slots total: the host's own plus one client.
    let mut host: Session<()> = Session::new(2);
    host.host(0).unwrap();
    let port = host.local_port().unwrap();

    let mut first: Session<()> = Session::new(8);
    first.join(localhost(port)).unwrap();

    let mut ctx = ();
    let mut first_ctx = ();
    let ok = pump(
        &mut [(&mut host, &mut ctx), (&mut first, &mut first_ctx)],
        |sessions| sessions[1].0.is_ready(),
    );
    assert!(ok);

    // The TCP connect itself succeeds, but the host refuses the session
    // and the rejected joiner collapses back to Disconnected.
    let mut extra: Session<()> = Session::new(8);
    extra.join(localhost(port)).unwrap();

    let mut extra_ctx = ();
    let ok = pump(
        &mut [
            (&mut host, &mut ctx),
            (&mut first, &mut first_ctx),
            (&mut extra, &mut extra_ctx),
        ],
        |sessions| !sessions[2].0.is_running(),
    );
    assert!(ok, "rejected joiner never tore down");
    assert_eq!(extra.state(), SessionState::Disconnected);

    assert_eq!(host.connections().count(), 2);
    assert!(first.is_ready());
}

#[test]
fn test_host_leave_forces_clients_out() {
    let mut host: Session<()> = Session::new(8);
    host.host(0).unwrap();
    let port = host.local_port().unwrap();

    let mut client: Session<()> = Session::new(8);
    client.join(localhost(port)).unwrap();

    let mut ctx = ();
    let mut client_ctx = ();
    let ok = pump(
        &mut [(&mut host, &mut ctx), (&mut client, &mut client_ctx)],
        |sessions| sessions[1].0.is_ready(),
    );
    assert!(ok);

    host.leave();

    let ok = pump(&mut [(&mut client, &mut client_ctx)], |sessions| {
        !sessions[0].0.is_running()
    });
    assert!(ok, "client survived host teardown");
    assert_eq!(client.state(), SessionState::Disconnected);
}

#[test]
fn test_host_prunes_departed_client() {
    let mut host: Session<()> = Session::new(8);
    host.host(0).unwrap();
    let port = host.local_port().unwrap();

    let mut client: Session<()> = Session::new(8);
    client.join(localhost(port)).unwrap();

    let mut ctx = ();
    let mut client_ctx = ();
    let ok = pump(
        &mut [(&mut host, &mut ctx), (&mut client, &mut client_ctx)],
        |sessions| sessions[1].0.is_ready(),
    );
    assert!(ok);
    assert_eq!(host.connections().count(), 2);

    client.leave();

    let ok = pump(&mut [(&mut host, &mut ctx)], |sessions| {
        sessions[0].0.connections().count() == 1
    });
    assert!(ok, "host never pruned the dead connection");
    // The host session itself stays up.
    assert!(host.is_host());
    assert!(host.is_ready());
}
