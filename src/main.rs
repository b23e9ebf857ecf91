use access_storefront::application::engine::{DepositOutcome, ReconciliationEngine};
use access_storefront::application::scheduler;
use access_storefront::config::Config;
use access_storefront::domain::account::AccountId;
use access_storefront::domain::payment::PaymentRef;
use access_storefront::domain::plan::PlanId;
use access_storefront::domain::ports::LedgerStoreRef;
use access_storefront::domain::subscription::{Subscription, SubscriptionId};
use access_storefront::error::ShopError;
use access_storefront::infrastructure::clock::SystemClock;
use access_storefront::infrastructure::in_memory::InMemoryLedgerStore;
use access_storefront::infrastructure::xui::XuiPanel;
use access_storefront::infrastructure::yoomoney::YooMoneyProcessor;
use access_storefront::interfaces::csv::account_writer::AccountWriter;
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use rust_decimal::Decimal;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file. Environment variables are read when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Recover open purchases, then run the deposit and expiry sweeps until Ctrl-C
    Serve,
    /// Open a deposit and print the payment link
    Deposit {
        #[arg(long)]
        account: i64,
        #[arg(long)]
        amount: Decimal,
    },
    /// Check whether a deposit has been paid
    CheckPayment {
        #[arg(long = "ref")]
        payment_ref: String,
    },
    /// Buy a plan from the balance
    Buy {
        #[arg(long)]
        account: i64,
        #[arg(long)]
        plan: String,
    },
    Balance {
        #[arg(long)]
        account: i64,
    },
    /// Active subscriptions of an account
    Subscriptions {
        #[arg(long)]
        account: i64,
    },
    /// Live panel state of one subscription's credential
    Status {
        #[arg(long)]
        account: i64,
        #[arg(long)]
        subscription: u64,
    },
    /// Revoke a subscription (admin only)
    Revoke {
        #[arg(long)]
        admin: i64,
        #[arg(long)]
        subscription: u64,
    },
    /// Run one deposit sweep and one expiry sweep
    Sweep,
    /// List the plans on sale
    Plans,
    /// Dump all account balances as CSV
    Accounts,
}

#[cfg(feature = "storage-rocksdb")]
fn open_ledger(path: Option<PathBuf>) -> Result<LedgerStoreRef> {
    use access_storefront::infrastructure::rocksdb::RocksDBStore;

    match path {
        Some(path) => Ok(Arc::new(RocksDBStore::open(path).into_diagnostic()?)),
        None => Ok(Arc::new(InMemoryLedgerStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_ledger(path: Option<PathBuf>) -> Result<LedgerStoreRef> {
    if path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryLedgerStore::new()))
}

/// Turns an engine error into the message a user sees.
fn user_error(err: ShopError) -> miette::Report {
    warn!(error = %err, "Request failed");
    miette!("{}", err.class())
}

fn print_subscription(sub: &Subscription) {
    println!(
        "#{} {} {} until {} ({})",
        sub.id,
        sub.plan,
        sub.credential.label,
        sub.expires_at.format("%Y-%m-%d %H:%M UTC"),
        sub.credential.client_id
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path).into_diagnostic()?,
        None => Config::from_env().into_diagnostic()?,
    };

    let ledger = open_ledger(cli.db_path.clone().or_else(|| config.database.path.clone()))?;
    let processor = Arc::new(YooMoneyProcessor::new(config.yoomoney.clone()).into_diagnostic()?);
    let panel = Arc::new(XuiPanel::new(config.panel.clone()).into_diagnostic()?);
    let engine = Arc::new(ReconciliationEngine::new(
        ledger.clone(),
        processor,
        panel,
        Arc::new(SystemClock),
        config.plans.clone(),
        config.engine_settings(),
    ));

    match cli.command {
        Command::Serve => {
            let recovered = engine.recover_reservations().await.into_diagnostic()?;
            info!(?recovered, "Startup recovery finished");

            let (tx, mut rx) = mpsc::channel(64);
            let handle = scheduler::spawn(engine.clone(), &config.schedule, Some(tx));
            let notifier = tokio::spawn(async move {
                while let Some(report) = rx.recv().await {
                    for intent in report.credited {
                        println!("credited {} {} ({})", intent.account, intent.amount, intent.payment_ref);
                    }
                    for intent in report.failed {
                        println!("failed {} {} ({})", intent.account, intent.amount, intent.payment_ref);
                    }
                }
            });

            tokio::signal::ctrl_c().await.into_diagnostic()?;
            info!("Shutting down");
            handle.shutdown().await;
            let _ = notifier.await;
        }
        Command::Deposit { account, amount } => {
            let opened = engine
                .request_deposit(AccountId(account), amount)
                .await
                .map_err(user_error)?;
            println!("{}", opened.payment_ref);
            println!("{}", opened.instructions.redirect_url);
        }
        Command::CheckPayment { payment_ref } => {
            let outcome = engine
                .confirm_deposit(&PaymentRef::from(payment_ref.as_str()))
                .await
                .map_err(user_error)?;
            let text = match outcome {
                DepositOutcome::Credited => "credited",
                DepositOutcome::AlreadyCredited => "already credited",
                DepositOutcome::Pending => "not paid yet",
                DepositOutcome::Failed => "failed",
                DepositOutcome::Busy => "being checked, try again shortly",
            };
            println!("{text}");
        }
        Command::Buy { account, plan } => {
            let subscription = engine
                .request_purchase(AccountId(account), &PlanId::from(plan.as_str()))
                .await
                .map_err(user_error)?;
            print_subscription(&subscription);
        }
        Command::Balance { account } => {
            let balance = engine.get_balance(AccountId(account)).await.map_err(user_error)?;
            println!("Balance of {account}: {balance}");
        }
        Command::Subscriptions { account } => {
            let subscriptions = engine
                .list_subscriptions(AccountId(account))
                .await
                .map_err(user_error)?;
            if subscriptions.is_empty() {
                println!("No active subscriptions");
            }
            for sub in &subscriptions {
                print_subscription(sub);
            }
        }
        Command::Status { account, subscription } => {
            match engine
                .credential_status(AccountId(account), SubscriptionId(subscription))
                .await
                .map_err(user_error)?
            {
                Some(client) => println!(
                    "{} enabled={} up={} down={} expiry={}",
                    client.label, client.enable, client.up, client.down, client.expiry_time
                ),
                None => println!("Credential not present on the panel"),
            }
        }
        Command::Revoke { admin, subscription } => {
            if !config.is_admin(AccountId(admin)) {
                return Err(miette!("account {admin} is not an administrator"));
            }
            let revoked = engine
                .revoke_subscription(SubscriptionId(subscription))
                .await
                .map_err(user_error)?;
            if revoked {
                println!("Subscription {subscription} revoked");
            } else {
                println!("Subscription {subscription} is not active");
            }
        }
        Command::Sweep => {
            let deposits = engine.run_deposit_sweep().await.into_diagnostic()?;
            let expired = engine.run_expiry_sweep().await.into_diagnostic()?;
            println!(
                "credited={} failed={} pending={} errors={} expired={}",
                deposits.credited.len(),
                deposits.failed.len(),
                deposits.pending,
                deposits.errors,
                expired
            );
        }
        Command::Plans => {
            for plan in engine.catalog().plans() {
                println!(
                    "{}\t{}\t{}\t{} days",
                    plan.id, plan.title, plan.price, plan.duration_days
                );
            }
        }
        Command::Accounts => {
            let accounts = ledger.all_accounts().await.into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = AccountWriter::new(stdout.lock());
            writer.write_accounts(accounts).into_diagnostic()?;
        }
    }

    Ok(())
}
