//! Sessions against a stand-in REPL written in sh, run on a real pty.

use std::time::Duration;

use clap::Parser as _;
use kirby::cli::{self, Cli};
use kirby::{Arena, Kind, QueryError, Session, SessionConfig, SessionState};

const FAKE_REPL: &str = r#"
printf 'Welcome to Nix\nType :? for help.\n\nnix-repl> '
while IFS= read -r line; do
  case "$line" in
    ':p hm.config.kirby')
      printf '\033[1m{\033[0m a = \033[36;1m1\033[0m; b = [ 1 2 ]; name = "kirby"; }\n\nnix-repl> ' ;;
    ':p hm.config.broken')
      printf "\033[31;1merror:\033[0m undefined variable 'broken'\n\nnix-repl> " ;;
    ':p hm.config.half')
      printf '{ a = [ 1\n\nnix-repl> ' ;;
    *)
      printf '\nnix-repl> ' ;;
  esac
done
"#;

fn config(echo: bool) -> SessionConfig {
    SessionConfig {
        program: "/bin/sh".into(),
        args: vec!["-c".into(), FAKE_REPL.into()],
        timeout: Duration::from_secs(5),
        echo,
        import: "x = 1".into(),
        ..SessionConfig::default()
    }
}

fn run_queries(echo: bool) {
    let arena = Arena::with_reserve("pty-session", 1 << 24).unwrap();
    let mut session = Session::spawn(config(echo)).unwrap();
    let out = session
        .extract(&arena, &["hm.config.kirby", "hm.config.broken", "hm.config.half"])
        .unwrap();
    assert_eq!(session.state(), SessionState::CapturedOutput);

    let tree = out.tree("hm.config.kirby").unwrap();
    assert_eq!(tree.get("a").unwrap().as_i64(), Some(1));
    assert_eq!(tree.get("b").unwrap().kind, Kind::List);
    assert_eq!(tree.get("name").unwrap().as_str(), Some("kirby"));

    match out.get("hm.config.broken").unwrap() {
        Err(QueryError::Repl(msg)) => assert!(msg.starts_with("error: undefined variable"), "{msg}"),
        other => panic!("expected a repl error, got {other:?}"),
    }
    match out.get("hm.config.half").unwrap() {
        Err(QueryError::Parse(e)) => assert!(e.is_partial()),
        other => panic!("expected a parse error, got {other:?}"),
    }
    assert_eq!(out.failures(), 2);

    session.close().unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn extract_with_terminal_echo() {
    run_queries(true);
}

#[test]
fn extract_without_echo() {
    run_queries(false);
}

#[test]
fn trees_outlive_the_session() {
    let arena = Arena::with_reserve("pty-session", 1 << 24).unwrap();
    let out = {
        let mut session = Session::spawn(config(true)).unwrap();
        let out = session.extract(&arena, &["hm.config.kirby"]).unwrap();
        session.close().unwrap();
        out
    };
    assert_eq!(out.tree("hm.config.kirby").unwrap().get("a").unwrap().raw, b"1");
}

#[test]
fn missing_program_fails_to_spawn() {
    let config = SessionConfig {
        program: "/nonexistent/nix".into(),
        ..config(true)
    };
    assert!(Session::spawn(config).is_err());
}

#[test]
fn printed_report() {
    let arena = Arena::with_reserve("pty-session", 1 << 24).unwrap();
    let mut session = Session::spawn(config(true)).unwrap();
    let out = session
        .extract(&arena, &["hm.config.kirby", "hm.config.broken"])
        .unwrap();
    session.close().unwrap();

    let cli = Cli::try_parse_from(["kirby", "-g", "b", "-g", "missing"]).unwrap();
    let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
    let failures = cli::print_extraction(&mut stdout, &mut stderr, &out, &cli).unwrap();
    assert_eq!(failures, 1);

    let stdout = String::from_utf8(stdout).unwrap();
    let mut lines = stdout.lines();
    assert_eq!(lines.next(), Some("# hm.config.kirby"));
    assert_eq!(lines.next(), Some("b\tlist\t[ 1 2 ]"));
    assert!(lines.next().unwrap().starts_with("missing\terror\t"));

    let stderr = String::from_utf8(stderr).unwrap();
    assert!(stderr.starts_with("kirby: hm.config.broken: repl reported error:"), "{stderr}");
}
