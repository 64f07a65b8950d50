use clap::Parser;

mod delivery;
mod schedule;

use delivery::{NotificationPhrase, NOTIFICATION_TITLE};
use schedule::{NotificationSchedule, NotifySettings, Plan};

#[derive(Parser, Debug)]
#[command(name = "daily_notifier", version)]
struct Args {
    /// Core base URL, e.g. http://127.0.0.1:17620
    #[arg(long, default_value = "http://127.0.0.1:17620")]
    core_url: String,

    /// How often to re-read notification settings from the core (seconds).
    #[arg(long, default_value_t = 60)]
    settings_check_seconds: u64,

    /// Notify at this local time (HH:MM) regardless of the core's on/off setting.
    #[arg(long)]
    time: Option<String>,

    /// Category to draw from instead of the core's selected category.
    #[arg(long)]
    category: Option<String>,

    /// Exit after the first notification instead of re-arming for the next day.
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Show one notification right away and exit.
    #[arg(long, default_value_t = false)]
    notify_now: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "daily_notifier=info".into()),
        )
        .init();

    let args = Args::parse();
    run(args).await
}

async fn run(args: Args) -> anyhow::Result<()> {
    use chrono::Local;
    use reqwest::Client;
    use std::time::Instant;
    use tokio::time::{sleep, Duration};
    use tracing::{error, info};

    let forced_time = match args.time.as_deref() {
        Some(raw) => Some(
            schedule::parse_time_of_day(raw)
                .ok_or_else(|| anyhow::anyhow!("invalid --time '{raw}'. Use HH:MM, e.g. 09:00"))?,
        ),
        None => None,
    };

    let client = Client::new();
    let base_url = args.core_url.trim_end_matches('/').to_string();

    if args.notify_now {
        let category = args.category.clone().unwrap_or_default();
        let phrase = delivery::pick_phrase(&category, |c| {
            fetch_random_phrase(&client, &base_url, c)
        })
        .await;
        show_notification(&phrase);
        return Ok(());
    }

    // Two notifiers would post every phrase twice.
    #[cfg(windows)]
    let _mutex = match ensure_single_instance_mutex() {
        Ok(g) => g,
        Err(e) => {
            info!("daily_notifier already running; exit ({e})");
            return Ok(());
        }
    };

    info!("Daily notifier started. Reading settings from {base_url}");

    let check_every = Duration::from_secs(args.settings_check_seconds.max(1));
    let mut schedule: NotificationSchedule<Local> = NotificationSchedule::new();
    let mut plan: Option<Plan> = None;
    let mut last_check: Option<Instant> = None;

    loop {
        if last_check.map_or(true, |t| t.elapsed() >= check_every) {
            last_check = Some(Instant::now());
            match fetch_settings(&client, &base_url).await {
                Ok(settings) => {
                    plan = schedule::resolve_plan(
                        Some(&settings),
                        forced_time,
                        args.category.as_deref(),
                    );
                }
                Err(e) => {
                    error!("settings fetch failed: {e}");
                    // Keep the current plan; overrides alone can still arm a schedule.
                    if plan.is_none() {
                        plan = schedule::resolve_plan(None, forced_time, args.category.as_deref());
                    }
                }
            }
        }

        let now = Local::now();
        match &plan {
            Some(p) => {
                if schedule.needs_arming(p) {
                    let at = schedule.schedule(&now, p.clone());
                    let category = if p.category.is_empty() {
                        "(any)"
                    } else {
                        p.category.as_str()
                    };
                    info!(
                        "next notification at {} (category {category})",
                        at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
            None => {
                if schedule.is_armed() {
                    schedule.cancel();
                    info!("notifications disabled; pending notification cancelled");
                }
            }
        }

        if let Some(category) = schedule.due(&now).map(str::to_string) {
            let phrase = delivery::pick_phrase(&category, |c| {
                fetch_random_phrase(&client, &base_url, c)
            })
            .await;
            show_notification(&phrase);
            schedule.mark_fired(&Local::now());
            if args.once {
                return Ok(());
            }
            continue;
        }

        let mut wait = check_every;
        if let Some(at) = schedule.fire_at() {
            let until = (at.clone() - Local::now()).to_std().unwrap_or(Duration::ZERO);
            wait = wait.min(until);
        }
        sleep(wait.max(Duration::from_millis(200))).await;
    }
}

async fn get_ok_opt<T: serde::de::DeserializeOwned>(
    req: reqwest::RequestBuilder,
) -> anyhow::Result<Option<T>> {
    #[derive(serde::Deserialize)]
    struct OkResponse<T> {
        ok: bool,
        data: Option<T>,
    }

    let res = req.send().await?;
    if !res.status().is_success() {
        anyhow::bail!("http_{}", res.status().as_u16());
    }
    let body: OkResponse<T> = res.json().await?;
    if !body.ok {
        anyhow::bail!("not_ok");
    }
    Ok(body.data)
}

async fn fetch_settings(client: &reqwest::Client, base_url: &str) -> anyhow::Result<NotifySettings> {
    get_ok_opt(client.get(format!("{base_url}/settings")))
        .await?
        .ok_or_else(|| anyhow::anyhow!("missing_data"))
}

async fn fetch_random_phrase(
    client: &reqwest::Client,
    base_url: &str,
    category: String,
) -> anyhow::Result<Option<NotificationPhrase>> {
    get_ok_opt(
        client
            .get(format!("{base_url}/phrases/random"))
            .query(&[("category", category.as_str())]),
    )
    .await
}

fn show_notification(phrase: &NotificationPhrase) {
    use tracing::info;

    info!(
        "{NOTIFICATION_TITLE}: {} ({})",
        phrase.text,
        if phrase.reference.is_empty() {
            phrase.category.as_str()
        } else {
            phrase.reference.as_str()
        }
    );

    // Best-effort toast; activating it opens the phrase through the app's deep link.
    #[cfg(windows)]
    {
        use win_toast_notify::{Duration, WinToastNotify};

        let link = phrase.deep_link();
        let reference_line = if phrase.reference.trim().is_empty() {
            String::new()
        } else {
            format!("- {}", phrase.reference.trim())
        };
        let _ = WinToastNotify::new()
            .set_open(link.as_str())
            .set_duration(Duration::Long)
            .set_title(NOTIFICATION_TITLE)
            .set_messages(vec![phrase.text.as_str(), reference_line.as_str()])
            .show();
    }
    #[cfg(not(windows))]
    {
        tracing::debug!("toast body: {}", phrase.body().replace('\n', " "));
    }
}

#[cfg(windows)]
struct MutexGuard(windows_sys::Win32::Foundation::HANDLE);

#[cfg(windows)]
impl Drop for MutexGuard {
    fn drop(&mut self) {
        unsafe {
            windows_sys::Win32::Foundation::CloseHandle(self.0);
        }
    }
}

#[cfg(windows)]
fn ensure_single_instance_mutex() -> anyhow::Result<MutexGuard> {
    use std::ffi::c_void;
    use std::iter;
    use windows_sys::Win32::Foundation::{GetLastError, BOOL, ERROR_ALREADY_EXISTS, HANDLE};

    #[link(name = "kernel32")]
    extern "system" {
        fn CreateMutexW(
            lp_mutex_attributes: *const c_void,
            b_initial_owner: BOOL,
            lp_name: *const u16,
        ) -> HANDLE;
    }

    let name: Vec<u16> = "Local\\DailyPhrases.daily_notifier"
        .encode_utf16()
        .chain(iter::once(0))
        .collect();

    unsafe {
        let h = CreateMutexW(std::ptr::null(), 0, name.as_ptr());
        if h.is_null() {
            anyhow::bail!("CreateMutexW_failed");
        }
        if GetLastError() == ERROR_ALREADY_EXISTS {
            windows_sys::Win32::Foundation::CloseHandle(h);
            anyhow::bail!("already_exists");
        }
        Ok(MutexGuard(h))
    }
}
