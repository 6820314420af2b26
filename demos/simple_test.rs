use anyhow::Result;
use waftester::{TestBuilder, TrafficType};

#[tokio::main]
async fn main() -> Result<()> {
    // Configure and run an attack test
    let result = TestBuilder::new("https://example.com")
        .requests(20) // 20 requests
        .duration(10) // spread over 10 seconds
        .traffic_type(TrafficType::Attack)
        .add_header("X-Test-Run", "waftester-example")
        .run()
        .await?;

    println!("Test completed!");
    println!("Total requests: {}", result.total_requests);
    println!("Blocked: {}", result.blocked_count);
    if result.rate_limit_hit {
        println!("First block at request {}", result.rate_limit_at);
    }
    println!("Mean latency: {}ms", result.avg_response);
    println!("95th percentile: {}ms", result.p95_response);
    println!("Requests/second: {:.2}", result.requests_per_sec);

    Ok(())
}
