//! User-facing message catalog

use tracing::warn;

/// Language the bot talks to users in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    En,
    Ru,
}

impl Language {
    /// Resolve a language code such as `en`, `ru` or `ru-RU`.
    /// Unknown codes fall back to English.
    pub fn from_code(code: &str) -> Self {
        let primary = code.split(['-', '_']).next().unwrap_or_default();
        match primary.to_lowercase().as_str() {
            "en" | "" => Self::En,
            "ru" => Self::Ru,
            other => {
                warn!("Unsupported language '{}', falling back to English", other);
                Self::En
            }
        }
    }

    pub fn not_allowed(self, user_id: i64, admin_contact: &str) -> String {
        match self {
            Self::En => format!(
                "Dear user with ID {user_id}, unfortunately, you are not authorized to use this chatbot. To request access, please contact the administrator {admin_contact} and provide your user ID."
            ),
            Self::Ru => format!(
                "Уважаемый пользователь с ID {user_id}, к сожалению, у вас нет доступа к использованию этого чат-бота. Чтобы запросить доступ, пожалуйста, свяжитесь с администратором {admin_contact} и предоставьте ваш ID пользователя."
            ),
        }
    }

    pub fn unexpected_error(self, admin_contact: &str, error: &str) -> String {
        match self {
            Self::En => format!(
                "An unexpected error occurred while processing your request. To resolve the issue, please forward this message to the bot administrator {admin_contact}.\n\nError message: {error}."
            ),
            Self::Ru => format!(
                "Произошла неожиданная ошибка при обработке вашего запроса. Для устранения проблемы, пожалуйста, перешлите это сообщение администратору бота {admin_contact}.\n\nСообщение об ошибке: {error}."
            ),
        }
    }

    pub fn not_supported(self) -> &'static str {
        match self {
            Self::En => "This type of message is not supported.",
            Self::Ru => "Этот тип сообщения не поддерживается.",
        }
    }

    pub fn command_not_supported(self) -> &'static str {
        match self {
            Self::En => "This command is not supported.",
            Self::Ru => "Эта команда не поддерживается.",
        }
    }

    pub fn done(self) -> &'static str {
        match self {
            Self::En => "Done.",
            Self::Ru => "Готово.",
        }
    }

    /// Cost summary; amounts are already converted to the display currency
    pub fn stats(self, currency: &str, last: f64, today: f64, month: f64, total: f64) -> String {
        match self {
            Self::En => format!(
                "*Cost statistics*```\nLast message: {currency}{last:.2}\nToday       : {currency}{today:.2}\nThis month  : {currency}{month:.2}\nAll-time    : {currency}{total:.2}```"
            ),
            Self::Ru => format!(
                "*Статистика расходов*```\nПоследнее сообщ.: {currency}{last:.2}\nЗа сегодня      : {currency}{today:.2}\nВ этом месяце   : {currency}{month:.2}\nЗа все время    : {currency}{total:.2}```"
            ),
        }
    }

    pub fn greeting(self, name: &str) -> String {
        match self {
            Self::En => format!(
                "*Welcome to the {name} chatbot!*\n\nSend me a message to start a conversation or choose one of the available commands:\n\n"
            ),
            Self::Ru => format!(
                "*Вас приветствует {name} чат-бот!*\n\nОтправь мне сообщение для начала беседы или выбери одну из доступных команд:\n\n"
            ),
        }
    }

    pub fn support(self, admin_contact: &str) -> String {
        match self {
            Self::En => format!("For support inquiries, please contact {admin_contact}."),
            Self::Ru => format!("По вопросам поддержки, пожалуйста, обращайтесь к {admin_contact}."),
        }
    }

    pub fn command_help(self) -> &'static str {
        match self {
            Self::En => "Show the help message.",
            Self::Ru => "Показать справочное сообщение.",
        }
    }

    pub fn command_stats(self) -> &'static str {
        match self {
            Self::En => "Get usage statistics.",
            Self::Ru => "Получить статистику использования.",
        }
    }

    pub fn command_restart(self) -> &'static str {
        match self {
            Self::En => {
                "Restart the conversation. Optionally, pass general instructions (for example, /restart you are a helpful assistant)."
            }
            Self::Ru => {
                "Перезагрузить разговор. По желанию передай общие инструкции (например, /restart ты полезный помощник)."
            }
        }
    }
}
