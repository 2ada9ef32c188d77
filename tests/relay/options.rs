//! The feed option mini-language

use news_relay::Feed;
use news_relay::feeds::{numeric_value, option, quoted_argument, suffix};

#[test]
fn test_letters_and_arguments() {
    let options = r#"C9E"hello \"world\""X"#;
    assert_eq!(option(options, 'C').as_deref(), Some("9"));
    assert_eq!(option(options, 'E').as_deref(), Some(""));
    assert_eq!(option(options, 'X').as_deref(), Some(""));
    assert_eq!(option(options, 'Z'), None);
    assert_eq!(quoted_argument(options, 'E').as_deref(), Some(r#"hello "world""#));
}

#[test]
fn test_suffixes_and_numbers() {
    let options = "Bo4096L2V2.10";
    let batch = option(options, 'B').unwrap();
    assert_eq!(suffix(&batch), "o");
    assert_eq!(numeric_value(&batch), 4096);
    assert_eq!(option(options, 'V').as_deref(), Some("2.10"));
    assert_eq!(option(options, 'L').as_deref(), Some("2"));
}

#[test]
fn test_feed_hop_limit() {
    assert_eq!(Feed::new("a", "all").hop_limit(), None);
    assert_eq!(Feed::new("a", "all").with_options("L").hop_limit(), Some(1));
    assert_eq!(Feed::new("a", "all").with_options("L0").hop_limit(), Some(1));
    assert_eq!(Feed::new("a", "all").with_options("FL3").hop_limit(), Some(3));
}
