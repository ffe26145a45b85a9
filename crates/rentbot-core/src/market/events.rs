//! Classification of marketplace system messages.
//!
//! Order and feedback lifecycle events arrive as chat messages authored by
//! the marketplace itself. The texts are stable Russian templates; each one
//! embeds the order id as `#XXXXXXXX`.

use crate::market::ChatMessageIn;
use crate::text::extract_order_id;

/// A recognized system event carried by a marketplace message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    OrderPurchased { order_id: String },
    OrderConfirmed { order_id: String },
    OrderConfirmedByAdmin { order_id: String },
    Refund { order_id: String },
    PartialRefund { order_id: String },
    RefundByAdmin { order_id: String },
    NewFeedback { order_id: String },
    FeedbackChanged { order_id: String },
    FeedbackDeleted { order_id: String },
}

impl SystemEvent {
    pub fn order_id(&self) -> &str {
        match self {
            SystemEvent::OrderPurchased { order_id }
            | SystemEvent::OrderConfirmed { order_id }
            | SystemEvent::OrderConfirmedByAdmin { order_id }
            | SystemEvent::Refund { order_id }
            | SystemEvent::PartialRefund { order_id }
            | SystemEvent::RefundByAdmin { order_id }
            | SystemEvent::NewFeedback { order_id }
            | SystemEvent::FeedbackChanged { order_id }
            | SystemEvent::FeedbackDeleted { order_id } => order_id,
        }
    }

    /// The order reached a terminal paid-out state (cancel auto-tickets).
    pub fn is_refund(&self) -> bool {
        matches!(
            self,
            SystemEvent::Refund { .. }
                | SystemEvent::PartialRefund { .. }
                | SystemEvent::RefundByAdmin { .. }
        )
    }

    pub fn is_confirmation(&self) -> bool {
        matches!(
            self,
            SystemEvent::OrderConfirmed { .. } | SystemEvent::OrderConfirmedByAdmin { .. }
        )
    }
}

/// Match a system message against the known templates.
pub fn classify(message: &ChatMessageIn) -> Option<SystemEvent> {
    if !message.is_system() {
        return None;
    }
    classify_text(&message.text)
}

/// Template matching on the raw text; separated for tests.
pub fn classify_text(text: &str) -> Option<SystemEvent> {
    let order_id = extract_order_id(text)?;
    let lowered = text.to_lowercase();

    let event = if lowered.contains("оплатил заказ") {
        SystemEvent::OrderPurchased { order_id }
    } else if lowered.contains("администратор") && lowered.contains("вернул деньги") {
        SystemEvent::RefundByAdmin { order_id }
    } else if lowered.contains("частично вернул") || lowered.contains("частичный возврат") {
        SystemEvent::PartialRefund { order_id }
    } else if lowered.contains("вернул деньги") {
        SystemEvent::Refund { order_id }
    } else if lowered.contains("администратор") && lowered.contains("подтвердил") {
        SystemEvent::OrderConfirmedByAdmin { order_id }
    } else if lowered.contains("подтвердил успешное выполнение заказа") {
        SystemEvent::OrderConfirmed { order_id }
    } else if lowered.contains("написал отзыв") {
        SystemEvent::NewFeedback { order_id }
    } else if lowered.contains("изменил отзыв") {
        SystemEvent::FeedbackChanged { order_id }
    } else if lowered.contains("удалил отзыв") {
        SystemEvent::FeedbackDeleted { order_id }
    } else {
        return None;
    };
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_order_purchased() {
        let event = classify_text("Покупатель alice оплатил заказ #A1B2C3D4.").unwrap();
        assert_eq!(
            event,
            SystemEvent::OrderPurchased {
                order_id: "A1B2C3D4".into()
            }
        );
    }

    #[test]
    fn classifies_confirmations() {
        let event =
            classify_text("Покупатель bob подтвердил успешное выполнение заказа #AAAA1111.")
                .unwrap();
        assert!(event.is_confirmation());

        let admin = classify_text("Администратор Support подтвердил заказ #AAAA1111.").unwrap();
        assert_eq!(
            admin,
            SystemEvent::OrderConfirmedByAdmin {
                order_id: "AAAA1111".into()
            }
        );
    }

    #[test]
    fn classifies_refund_variants() {
        assert!(classify_text("Продавец вернул деньги покупателю по заказу #BBBB2222.")
            .unwrap()
            .is_refund());
        assert!(
            classify_text("Продавец частично вернул деньги по заказу #BBBB2222.")
                .unwrap()
                .is_refund()
        );
        assert!(
            classify_text("Администратор Anna вернул деньги покупателю по заказу #BBBB2222.")
                .unwrap()
                .is_refund()
        );
    }

    #[test]
    fn classifies_feedback_lifecycle() {
        assert_eq!(
            classify_text("Покупатель carol написал отзыв к заказу #CCCC3333."),
            Some(SystemEvent::NewFeedback {
                order_id: "CCCC3333".into()
            })
        );
        assert_eq!(
            classify_text("Покупатель carol изменил отзыв к заказу #CCCC3333."),
            Some(SystemEvent::FeedbackChanged {
                order_id: "CCCC3333".into()
            })
        );
        assert_eq!(
            classify_text("Покупатель carol удалил отзыв к заказу #CCCC3333."),
            Some(SystemEvent::FeedbackDeleted {
                order_id: "CCCC3333".into()
            })
        );
    }

    #[test]
    fn plain_chat_is_not_an_event() {
        assert_eq!(classify_text("привет, как получить код?"), None);
        // Template text without an order id is ignored too.
        assert_eq!(classify_text("оплатил заказ"), None);
    }

    #[test]
    fn non_system_messages_never_classify() {
        let msg = ChatMessageIn {
            id: 1,
            chat_id: 2,
            author: Some("alice".into()),
            author_id: 77,
            text: "Покупатель alice оплатил заказ #A1B2C3D4.".into(),
            sent_time: None,
            by_bot: false,
        };
        assert_eq!(classify(&msg), None);
    }
}
