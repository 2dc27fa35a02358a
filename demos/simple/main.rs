use std::time::Duration;

pub fn main() {
    env_logger::init();

    let api_key = std::env::var("SPLIT_API_KEY").unwrap();
    let client = splitsync::ClientConfig::from_api_key(api_key)
        .to_client()
        .unwrap();

    // Block waiting for the initial synchronization. Until this call returns, the local snapshot
    // may be empty.
    if let Err(err) = client.block_until_ready(Duration::from_secs(10)) {
        eprintln!("client is not ready: {err}");
    }

    for name in client.split_names() {
        let split = client.split(&name);
        println!("{name}: {:?}", split.map(|it| it.change_number));
    }

    // Flush pending impressions and events before exiting.
    client.destroy(true);
}
