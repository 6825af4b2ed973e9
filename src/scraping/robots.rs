//! robots.txt gating (spec §11.1), split out of the headless scraper so it
//! can be exercised against canned robots.txt bodies without a real
//! browser. Mirrors the donor original's `checkRobots`: one parsed
//! document cached per host, tested against the configured user-agent's
//! matching group.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use texting_robots::Robot;
use url::Url;

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-host robots.txt cache. A host with no robots.txt, or one that
/// fails to fetch or parse, is cached as "allow everything" — robots.txt
/// is advisory, and a fetch failure should never block a crawl (spec §7:
/// soft failures don't abort the pipeline).
pub struct RobotsCache {
    user_agent: String,
    client: reqwest::Client,
    cache: Mutex<HashMap<String, Robot>>,
}

impl RobotsCache {
    pub fn new(user_agent: impl Into<String>, client: reqwest::Client) -> Self {
        RobotsCache {
            user_agent: user_agent.into(),
            client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `url` may be fetched under this cache's user agent.
    pub async fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return true;
        };
        let Some(host) = parsed.host_str() else {
            return true;
        };
        let host = host.to_string();

        if let Some(robot) = self.cache.lock().unwrap().get(&host) {
            return robot.allowed(url);
        }

        let robot = self.fetch_and_parse(&parsed).await;
        let allowed = robot.allowed(url);
        self.cache.lock().unwrap().insert(host, robot);
        allowed
    }

    async fn fetch_and_parse(&self, page_url: &Url) -> Robot {
        let robots_url = format!("{}://{}/robots.txt", page_url.scheme(), page_url.authority());
        let body = tokio::time::timeout(FETCH_TIMEOUT, self.client.get(&robots_url).send())
            .await
            .ok()
            .and_then(|r| r.ok())
            .map(|resp| resp.bytes());

        let bytes = match body {
            Some(pending) => pending.await.ok(),
            None => None,
        };

        match bytes {
            Some(b) => Robot::new(&self.user_agent, &b).unwrap_or_else(|_| allow_all(&self.user_agent)),
            None => allow_all(&self.user_agent),
        }
    }
}

fn allow_all(user_agent: &str) -> Robot {
    Robot::new(user_agent, b"").expect("empty robots.txt always parses")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disallowed_path_is_rejected() {
        let robot = Robot::new("stackscout", b"User-agent: *\nDisallow: /private\n").unwrap();
        assert!(!robot.allowed("https://example.com/private/page"));
        assert!(robot.allowed("https://example.com/public"));
    }

    #[test]
    fn missing_robots_txt_allows_everything() {
        let robot = allow_all("stackscout");
        assert!(robot.allowed("https://example.com/anything"));
    }
}
