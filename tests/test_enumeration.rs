use fixtures::*;

use pretty_assertions::assert_eq;
use wecadmin::SubscriptionClient;

fn collector_with(names: &[String]) -> FakeCollector {
    names
        .iter()
        .fold(FakeCollector::new(), |collector, name| {
            collector.with_subscription(name, vec![])
        })
}

fn enumerate(collector: &FakeCollector) -> Vec<String> {
    SubscriptionClient::new(collector)
        .enumerate_subscriptions()
        .unwrap()
}

#[test]
fn test_ascii_names_at_every_length() {
    ensure_env_logger_initialized();
    let names: Vec<String> = (0..=300).map(|len| "s".repeat(len)).collect();
    let collector = collector_with(&names);

    assert_eq!(enumerate(&collector), names);
    // One probe and one sized read per name, plus the final probe.
    assert_eq!(collector.calls("EcEnumNextSubscription"), names.len() * 2 + 1);
    assert_eq!(collector.open_handles(), 0);
}

#[test]
fn test_surrogate_pairs_at_every_length() {
    // `len` UTF-16 code units: pairs of `𝄞`, padded with one BMP character when odd.
    let names: Vec<String> = (1..=300)
        .map(|len| {
            let mut name = "𝄞".repeat(len / 2);
            if len % 2 == 1 {
                name.push('é');
            }
            name
        })
        .collect();
    for (len, name) in (1..=300).zip(&names) {
        assert_eq!(name.encode_utf16().count(), len);
    }
    let collector = collector_with(&names);

    assert_eq!(enumerate(&collector), names);
    assert_eq!(collector.open_handles(), 0);
}

#[test]
fn test_names_with_forbidden_looking_characters_survive() {
    let names = vec![
        "Forwarded Events (Security)".to_owned(),
        "a/b\\c:d".to_owned(),
        "日本語のサブスクリプション".to_owned(),
    ];
    let collector = collector_with(&names);

    assert_eq!(enumerate(&collector), names);
}
