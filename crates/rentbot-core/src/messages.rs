//! User-visible chat reply texts.
//!
//! Buyers on the marketplace are Russian-speaking, so every template is kept
//! in Russian. Formatting helpers that fill these templates live in
//! [`crate::text`] and [`crate::bot::replies`].

pub const STOCK_TITLE: &str = "Свободные лоты:";
pub const STOCK_EMPTY: &str = "Свободных лотов нет.";

pub const RENTALS_EMPTY: &str = "Активных аренд нет.";

pub const ORDER_LOT_MISSING: &str = "Не удалось определить лот. Напишите !админ.";
pub const ORDER_LOT_UNMAPPED: &str = "Лот не привязан к аккаунту. Напишите !админ.";
pub const ORDER_ACCOUNT_NO_REPLACEMENT: &str =
    "Лот уже занят другим покупателем, свободной замены нет. Напишите !админ.";
pub const ORDER_ACCOUNT_REPLACEMENT_PREFIX: &str = "Лот уже арендован другим покупателем. \
     Мы выдали вам замену, потому что предыдущий лот был занят.";

pub const ACCOUNT_HEADER: &str = "Ваш аккаунт:";
pub const ACCOUNT_TIMER_NOTE: &str =
    "⏱️ Отсчет аренды начнется после первого получения кода (!код).";
pub const RENTAL_STARTED_MESSAGE: &str = "⏱️ Аренда началась сейчас (с момента получения кода).";

pub const COMMANDS_RU: &str = "Команды:\n\
     !акк — данные аккаунта\n\
     !код — код Steam Guard\n\
     !сток — наличие аккаунтов\n\
     !продлить <часы> <ID_аккаунта> — продлить аренду\n\
     !пауза <ID> — пауза аренды на 1 час\n\
     !продолжить <ID> — снять паузу раньше срока\n\
     !админ — вызвать продавца\n\
     !лпзамена <ID> — замена аккаунта (10 минут после !код)\n\
     !отмена <ID> — отменить аренду\n\
     !бонус — бонусные часы";

pub const RENTAL_NOT_ACTIVE_MESSAGE: &str = "Аренда не активна. Напишите !админ.";
pub const RENTAL_FROZEN_MESSAGE: &str =
    "Администратор заморозил вашу аренду. Доступ временно приостановлен.";
pub const RENTAL_UNFROZEN_MESSAGE: &str = "Администратор разморозил вашу аренду. \
     Доступ восстановлен. Что бы получить код еще раз пропишите команду !код.";
pub const RENTAL_PAUSED_MESSAGE: &str = "⏸️ Ваша аренда заморожена на 1 час.\n\
     Чтобы продолжить раньше срока, напишите !продолжить";
pub const RENTAL_ALREADY_PAUSED_MESSAGE: &str = "⏸️ Аренда уже на паузе.";
pub const RENTAL_CODE_BLOCKED_MESSAGE: &str =
    "⏸️ Аренда на паузе, коды на время паузы недоступны.";
pub const RENTAL_CODE_FROZEN_MESSAGE: &str =
    "Аренда заморожена администратором, коды недоступны.";
pub const RENTAL_NOT_PAUSED_MESSAGE: &str = "▶️ Аренда не на паузе.";
pub const RENTAL_RESUMED_MESSAGE: &str = "▶️ Мы разморозили вашу аренду. \
     Доступ восстановлен. Что бы получить код еще раз пропишите команду !код.";
pub const RENTAL_PAUSE_EXPIRED_MESSAGE: &str =
    "⏰ Пауза истекла (прошло 1 час). Аренда возобновлена.";
pub const RENTAL_PAUSE_FAILED_MESSAGE: &str = "❌ Не удалось поставить аренду на паузу.";
pub const RENTAL_RESUME_FAILED_MESSAGE: &str = "❌ Не удалось снять паузу.";

pub const RENTAL_EXPIRED_MESSAGE: &str = "Аренда закончилась. Доступ закрыт.";
pub const RENTAL_EXPIRED_CONFIRM_MESSAGE: &str = "Заказ выполнен. Пожалуйста, зайдите в раздел \
     «Покупки», выберите его в списке и нажмите кнопку «Подтвердить выполнение заказа».";
pub const RENTAL_EXPIRE_DELAY_MESSAGE: &str = "Ваша аренда закончилась, но мы видим, что вы в матче.\n\
     У вас есть время, чтобы закончить матч. Через 1 минуту я проверю снова.\n\
     Доступ будет закрыт автоматически, если матч уже закончится.\n\
     Если хотите продлить — используйте команду:\n\
     !продлить <часы> <ID аккаунта>";

pub const RENTAL_CANCELLED_MESSAGE: &str = "Аренда отменена, доступ закрыт. Напишите !админ \
     по вопросам возврата.";
pub const RENTAL_CANCEL_FAILED_MESSAGE: &str = "❌ Не удалось отменить аренду. Напишите !админ.";

pub const ADMIN_CALLED_MESSAGE: &str =
    "Продавец уведомлен и скоро подключится к чату. Опишите ваш вопрос.";

pub const LP_REPLACE_NO_CODE_MESSAGE: &str =
    "Сначала получите код (!код), затем можно запросить замену.";
pub const LP_REPLACE_TOO_LATE_MESSAGE: &str =
    "Замена доступна только в течение 10 минут после получения кода (!код).";
pub const LP_REPLACE_NO_MMR_MESSAGE: &str =
    "Для замены нужен MMR аккаунта. Напишите администратору.";
pub const LP_REPLACE_NO_MATCH_MESSAGE: &str =
    "Нет свободного аккаунта для замены в пределах ±1000 MMR. Напишите администратору.";
pub const LP_REPLACE_FAILED_MESSAGE: &str =
    "Не удалось выполнить замену. Напишите администратору.";
pub const LP_REPLACE_RATE_LIMIT_MESSAGE: &str =
    "Замена уже использовалась недавно. Попробуйте через час или напишите !админ.";
pub const LP_REPLACE_SUCCESS_PREFIX: &str = "✅ Замена выполнена. Новый аккаунт:";

pub const BONUS_EMPTY_MESSAGE: &str = "У вас нет бонусных часов.";
pub const BONUS_APPLY_FAILED_MESSAGE: &str = "Не удалось применить бонус. Попробуйте позже.";
pub const BONUS_BAD_ID_MESSAGE: &str = "Укажите корректный ID аренды: !бонус <ID>";

pub const EXTEND_USAGE_MESSAGE: &str = "Укажите часы и ID: !продлить <часы> <ID_аккаунта>";

pub const BLACKLIST_UNBLOCKED_PREFIX: &str = "Оплата штрафа получена";
pub const BLACKLIST_UNBLOCKED_SUFFIX: &str = "Доступ разблокирован.";
