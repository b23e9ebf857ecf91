use crate::domain::account::{AccountId, Amount};
use crate::domain::payment::{OpenedIntent, PaymentIntent, PaymentRef, SettlementStatus};
use crate::domain::ports::{ClockRef, LedgerStoreRef, PaymentProcessorRef};
use crate::error::Result;
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Opens deposits with the payment processor and reads their settlement state.
///
/// This client never credits a balance: applying a settlement is the engine's job.
pub struct PaymentGatewayClient {
    processor: PaymentProcessorRef,
    ledger: LedgerStoreRef,
    clock: ClockRef,
}

impl PaymentGatewayClient {
    pub fn new(processor: PaymentProcessorRef, ledger: LedgerStoreRef, clock: ClockRef) -> Self {
        Self {
            processor,
            ledger,
            clock,
        }
    }

    /// Records a pending intent and asks the processor for a payment request.
    ///
    /// The local intent is written first so a settlement can always be matched to it.
    /// If the processor cannot be reached the intent is closed as failed and
    /// `GatewayUnavailable` is returned.
    pub async fn open_intent(&self, account: AccountId, amount: Decimal) -> Result<OpenedIntent> {
        let amount = Amount::new(amount)?;
        let payment_ref = PaymentRef::generate(account);
        let now = self.clock.now();

        self.ledger
            .open_payment_intent(PaymentIntent::new(payment_ref.clone(), account, amount, now))
            .await?;

        match self
            .processor
            .create_payment_request(&payment_ref, amount)
            .await
        {
            Ok(instructions) => {
                info!(%account, %payment_ref, %amount, "Deposit intent opened");
                Ok(OpenedIntent {
                    payment_ref,
                    instructions,
                })
            }
            Err(err) => {
                warn!(%account, %payment_ref, error = %err, "Payment request failed, closing intent");
                self.ledger
                    .fail_if_pending(&payment_ref, self.clock.now())
                    .await?;
                Err(err)
            }
        }
    }

    /// Asks the processor whether `payment_ref` has settled. Safe to repeat.
    pub async fn poll_settlement(&self, payment_ref: &PaymentRef) -> Result<SettlementStatus> {
        self.processor.settlement_status(payment_ref).await
    }
}
