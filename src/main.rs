use clap::Parser;
use sip_endpoint::transport::{RecordingTransport, TransportEvent};
use sip_endpoint::{
    utils, Account, AccountRegistry, EndpointConfig, EndpointEvent, Protocol, SipEndpoint,
};
use std::sync::Arc;

use tracing::info;

/// SIP Endpoint CLI Application
///
/// 使用记录型传输桩做干跑：把将要上线的传输动作打印出来，
/// 便于检查账户、拨号计划和准入配置
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SIP server address (e.g., ekiga.net)
    #[arg(short, long, env = "SIP_SERVER")]
    server: Option<String>,

    /// SIP username (e.g., user or user@example.com)
    #[arg(short, long, env = "SIP_USER")]
    user: Option<String>,

    /// SIP password
    #[arg(short, long, env = "SIP_PASSWORD")]
    password: Option<String>,

    /// Operation mode (register/dial/resolve/message)
    #[arg(short, long, default_value = "register")]
    mode: String,

    /// Call or message target (user@domain, sip:..., h323:..., 123#)
    #[arg(short, long)]
    target: Option<String>,

    /// Message body for message mode
    #[arg(long, default_value = "hello")]
    body: String,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    utils::initialize_logging(args.log_level.as_str());
    match args.mode.as_str() {
        "register" => run_register_mode(&args).await,
        "dial" => run_dial_mode(&args).await,
        "resolve" => run_resolve_mode(&args),
        "message" => run_message_mode(&args).await,
        _ => {
            eprintln!("Invalid mode. Use 'register', 'dial', 'resolve', or 'message'");
            Ok(())
        }
    }
}

fn build_endpoint(
    args: &Args,
) -> Result<
    (
        SipEndpoint,
        tokio::sync::mpsc::UnboundedReceiver<EndpointEvent>,
        Arc<RecordingTransport>,
    ),
    Box<dyn std::error::Error>,
> {
    let server = args.server.clone().ok_or("SIP server address is required")?;
    let user = args.user.clone().ok_or("SIP username is required")?;
    let password = args.password.clone().unwrap_or_default();

    let registry = AccountRegistry::new();
    let account =
        Account::new("CLI account", Protocol::Sip, server, user, password).with_enabled(true);
    registry.add(account)?;

    let transport = Arc::new(RecordingTransport::new());
    let (endpoint, events) =
        SipEndpoint::new(registry, EndpointConfig::default(), transport.clone());
    Ok((endpoint, events, transport))
}

fn dump(
    transport: &RecordingTransport,
    mut events: tokio::sync::mpsc::UnboundedReceiver<EndpointEvent>,
) {
    println!("--- 提交的传输动作 ---");
    for action in transport.actions() {
        println!("{:?}", action);
    }
    println!("--- 端点事件 ---");
    while let Ok(event) = events.try_recv() {
        println!("{:?}", event);
    }
}

async fn run_register_mode(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let (endpoint, events, transport) = build_endpoint(args)?;

    endpoint.register_all().await;

    // 回放一个成功结果，展示注册后的 MWI 订阅
    for account in endpoint.registry().list() {
        endpoint
            .handle_event(TransportEvent::RegistrationSucceeded {
                aor: account.aor(),
                was_registering: true,
            })
            .await;
    }

    dump(&transport, events);
    Ok(())
}

async fn run_dial_mode(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let (endpoint, events, transport) = build_endpoint(args)?;
    let target = args.target.clone().ok_or("Call target is required")?;

    endpoint.register_all().await;
    let token = endpoint.place_call(&target).await?;
    info!("呼叫已提交 (token: {})", token);

    dump(&transport, events);
    Ok(())
}

fn run_resolve_mode(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let target = args.target.clone().ok_or("Resolve target is required")?;

    let plan = sip_endpoint::DialPlan {
        default_sip_host: args.server.clone(),
        ..Default::default()
    };
    let address = sip_endpoint::AddressResolver::new(plan).resolve(&target)?;

    println!("scheme:    {}", address.scheme().as_str());
    println!("dialable:  {}", address.full_address(false));
    println!("full:      {}", address.full_address(true));
    println!("canonical: {}", address.canonical());
    Ok(())
}

async fn run_message_mode(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let (endpoint, events, transport) = build_endpoint(args)?;
    let target = args.target.clone().ok_or("Message target is required")?;

    endpoint.send_message(&target, &args.body).await?;

    dump(&transport, events);
    Ok(())
}
