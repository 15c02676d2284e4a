use std::{env, time::Duration};

use backend_wp::{ChatApi, DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT_MS, WpClient};

#[tokio::main]
async fn main() {
    let base_url = env::var("SWOON_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());

    let client = match WpClient::new(&base_url, Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS)) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Failed to initialize client: {err}");
            std::process::exit(1);
        }
    };
    println!("REST client initialized for {}", client.base_url());

    let (Ok(user), Ok(password)) = (env::var("SWOON_USER"), env::var("SWOON_PASSWORD")) else {
        println!("Set SWOON_USER and SWOON_PASSWORD to run the live login smoke.");
        return;
    };

    let session = match client.login(&user, &password).await {
        Ok(session) => session,
        Err(err) => {
            eprintln!("Login failed: {err}");
            std::process::exit(1);
        }
    };
    println!("Logged in as {}", session.profile.label());

    match client.list_threads(&session, 1, 10).await {
        Ok(page) => {
            println!("{} thread(s) on the first page", page.threads.len());
            for thread in page.threads {
                println!("  #{} {}", thread.thread_id, thread.title);
            }
        }
        Err(err) => {
            eprintln!("Thread listing failed: {err}");
            std::process::exit(1);
        }
    }
}
