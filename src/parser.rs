//! Heuristic text parser for LinkedIn "Save to PDF" exports.
//!
//! The input is the linearized text of the exported document. Sections are
//! located through localized anchor keywords, contact details are pattern
//! matched over the whole document, and the header (name, headline, location)
//! is classified line by line after contact strings have been stripped.
//! The parser never fails: anything it cannot find is left empty.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::profile::{ContactInfo, EducationEntry, ExperienceEntry, NamedItem, StructuredProfile};

// ============================================================================
// Patterns
// ============================================================================

const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december|\
janeiro|fevereiro|março|marco|abril|maio|junho|julho|agosto|setembro|outubro|novembro|dezembro|\
enero|febrero|marzo|mayo|junio|julio|septiembre|setiembre|octubre|noviembre|diciembre|\
jan|feb|fev|mar|apr|abr|jun|jul|aug|ago|sept|sep|set|oct|out|nov|dec|dez|dic";

const ONGOING: &str = "present|presente|o momento|actualidad|atualmente|current";

static MONTH_YEAR: Lazy<String> = Lazy::new(|| format!(r"(?:{MONTHS})\.?\s+(?:de\s+)?\d{{4}}"));

static EXPERIENCE_DATE_LINE: Lazy<Regex> = Lazy::new(|| {
    let my = MONTH_YEAR.as_str();
    Regex::new(&format!(
        r"(?i)^(?:{my}|\d{{4}})\s*[-–]\s*(?:{my}|\d{{4}}|{ONGOING})(?:\s*\([^)]*\))?$"
    ))
    .unwrap()
});

static EDUCATION_DATE: Lazy<Regex> = Lazy::new(|| {
    let my = MONTH_YEAR.as_str();
    Regex::new(&format!(
        r"(?i)\(\s*((?:{my}|\d{{4}})\s*[-–]\s*(?:{my}|\d{{4}}|{ONGOING}))\s*\)"
    ))
    .unwrap()
});

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap());

static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{2,3}\)\s?|\d{2,3}[\s.-])?\d{4,5}[\s.-]?\d{4}\b").unwrap()
});

static YEAR_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:19|20)\d{2}\s*[-–.\s]\s*(?:19|20)\d{2}$").unwrap());

static LINKEDIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:https?://)?(?:[a-z]{2,3}\.)?linkedin\.com/in/([A-Za-z0-9\-_%]+)/?").unwrap()
});

static GITHUB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:https?://)?(?:www\.)?github\.com/([A-Za-z0-9-]+)/?").unwrap()
});

static PORTFOLIO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)((?:https?://)?[a-z0-9][a-z0-9.-]*\.[a-z]{2,}(?:/[^\s()]*)?)\s*\((?:Portfolio|Personal|Company|Blog|Other|Outro|Otro)\)",
    )
    .unwrap()
});

static CONTACT_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\((?:LinkedIn|Mobile|Celular|Móvil|Home|Work|Trabalho|Portfolio|Personal|Company|Blog|Other|Outro|Otro)\)")
        .unwrap()
});

static PAGE_FOOTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:page|página)\s+\d+\s+(?:of|de)\s+\d+$").unwrap());

static TENURE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\d+\s+(?:years?|anos?|años?|months?|meses|mes|mês)\b").unwrap()
});

static BULLET_INLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([^\n])[ \t]*([•●▪])").unwrap());
static SPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());
static SPACE_AROUND_NEWLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r" *\n *").unwrap());
static NEWLINE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").unwrap());
static LEADING_BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[•●▪·\-\*–]\s*").unwrap());

const PLACE_WORD: &str = r"\p{Lu}[\p{L}'.\-]*";
const PLACE_CONNECTOR: &str = r"(?:de|do|da|dos|das|del|la|of|the)";

static PLACE_SHAPE: Lazy<Regex> = Lazy::new(|| {
    let part = format!(r"{PLACE_WORD}(?:\s+(?:{PLACE_CONNECTOR}\s+)?{PLACE_WORD})*");
    Regex::new(&format!(r"^{part}(?:,\s*{part}){{1,3}}$")).unwrap()
});

const REGION_MARKERS: &[&str] = &[
    "area", "região", "region", "metropolitan", "metropolitana", "greater", "grande",
];

const COUNTRIES: &[&str] = &[
    "Brazil", "Brasil", "Portugal", "United States", "Canada", "Spain", "España", "Argentina",
    "Mexico", "México", "Chile", "Colombia", "United Kingdom", "Germany", "France", "Ireland",
    "Netherlands",
];

const NAME_CONNECTORS: &[&str] = &["de", "da", "do", "dos", "das", "del", "van", "von", "la"];

// ============================================================================
// Section Anchors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Contact,
    TopSkills,
    Languages,
    Certifications,
    HonorsAwards,
    Publications,
    Summary,
    Experience,
    Education,
}

impl SectionKind {
    /// Priority order of the anchors, which is also their order in the export.
    pub const ORDER: [SectionKind; 9] = [
        SectionKind::Contact,
        SectionKind::TopSkills,
        SectionKind::Languages,
        SectionKind::Certifications,
        SectionKind::HonorsAwards,
        SectionKind::Publications,
        SectionKind::Summary,
        SectionKind::Experience,
        SectionKind::Education,
    ];

    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            SectionKind::Contact => &["Contact", "Contato", "Contacto", "Dados de contato"],
            SectionKind::TopSkills => &["Top Skills", "Principais competências", "Aptitudes principales"],
            SectionKind::Languages => &["Languages", "Idiomas"],
            SectionKind::Certifications => &["Certifications", "Certificações", "Certificaciones"],
            SectionKind::HonorsAwards => &["Honors-Awards", "Honors & Awards", "Prêmios", "Reconocimientos y premios"],
            SectionKind::Publications => &["Publications", "Publicações", "Publicaciones"],
            SectionKind::Summary => &["Summary", "Resumo", "Extracto"],
            SectionKind::Experience => &["Experience", "Experiência", "Experiencia"],
            SectionKind::Education => &["Education", "Formação acadêmica", "Educación"],
        }
    }

    /// Sidebar blocks sit in the left column of the export, before the header.
    pub fn is_sidebar(self) -> bool {
        !matches!(
            self,
            SectionKind::Summary | SectionKind::Experience | SectionKind::Education
        )
    }
}

fn is_anchor_line(line: &str) -> bool {
    SectionKind::ORDER
        .iter()
        .any(|kind| kind.aliases().iter().any(|alias| *alias == line))
}

fn locate_whole_line(text: &str, keyword: &str) -> Option<(usize, usize)> {
    let mut offset = 0;
    for line in text.split('\n') {
        if line.trim() == keyword {
            let start = offset + line.find(keyword).unwrap_or(0);
            return Some((start, start + keyword.len()));
        }
        offset += line.len() + 1;
    }
    None
}

/// Byte range of `keyword` in `text`, preferring a line that holds only the keyword.
fn locate_keyword(text: &str, keyword: &str) -> Option<(usize, usize)> {
    locate_whole_line(text, keyword)
        .or_else(|| text.find(keyword).map(|start| (start, start + keyword.len())))
}

fn locate_section(text: &str, kind: SectionKind) -> Option<(usize, usize)> {
    kind.aliases()
        .iter()
        .find_map(|alias| locate_whole_line(text, alias))
        .or_else(|| {
            kind.aliases()
                .iter()
                .filter_map(|alias| text.find(alias).map(|s| (s, s + alias.len())))
                .min_by_key(|(start, _)| *start)
        })
}

/// Text strictly between the end of `start_keyword` and the start of
/// `end_keyword` (or the end of the text), trimmed.
pub fn find_section_text(text: &str, start_keyword: &str, end_keyword: Option<&str>) -> Option<String> {
    let (_, content_start) = locate_keyword(text, start_keyword)?;
    let rest = &text[content_start..];
    let end = end_keyword
        .and_then(|kw| locate_keyword(rest, kw))
        .map(|(start, _)| start)
        .unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}

#[derive(Debug, Clone)]
struct Section {
    kind: SectionKind,
    anchor_start: usize,
    content_start: usize,
    content_end: usize,
}

/// Located sections of a normalized document.
#[derive(Debug, Clone)]
pub struct Sections<'a> {
    text: &'a str,
    found: Vec<Section>,
}

impl<'a> Sections<'a> {
    pub fn segment(text: &'a str) -> Self {
        let located: Vec<(SectionKind, usize, usize)> = SectionKind::ORDER
            .iter()
            .filter_map(|kind| locate_section(text, *kind).map(|(s, e)| (*kind, s, e)))
            .collect();

        let mut found = Vec::with_capacity(located.len());
        for (i, (kind, start, end)) in located.iter().enumerate() {
            // The section ends at the next anchor in priority order found after it.
            let mut content_end = located[i + 1..]
                .iter()
                .find(|(_, next_start, _)| next_start > start)
                .map(|(_, next_start, _)| *next_start)
                .unwrap_or(text.len());
            if content_end < *end {
                content_end = *end;
            }
            if kind.is_sidebar() {
                let body = &text[*end..content_end];
                let leading = body.len() - body.trim_start_matches('\n').len();
                if let Some(pos) = body[leading..].find("\n\n") {
                    content_end = *end + leading + pos;
                }
            }
            found.push(Section {
                kind: *kind,
                anchor_start: *start,
                content_start: *end,
                content_end,
            });
        }

        Sections { text, found }
    }

    pub fn get(&self, kind: SectionKind) -> Option<&'a str> {
        self.found
            .iter()
            .find(|s| s.kind == kind)
            .map(|s| self.text[s.content_start..s.content_end].trim())
    }

    /// Text above the first main section, with sidebar blocks cut out.
    pub fn header(&self) -> String {
        let main_start = self
            .found
            .iter()
            .filter(|s| !s.kind.is_sidebar())
            .map(|s| s.anchor_start)
            .min()
            .unwrap_or(self.text.len());

        let mut blocks: Vec<(usize, usize)> = self
            .found
            .iter()
            .filter(|s| s.kind.is_sidebar() && s.anchor_start < main_start)
            .map(|s| (s.anchor_start, s.content_end.min(main_start)))
            .collect();
        blocks.sort();

        let mut header = String::new();
        let mut cursor = 0;
        for (start, end) in blocks {
            if start > cursor {
                header.push_str(&self.text[cursor..start]);
                header.push('\n');
            }
            cursor = cursor.max(end);
        }
        if cursor < main_start {
            header.push_str(&self.text[cursor..main_start]);
        }
        header
    }
}

// ============================================================================
// Normalization & Contacts
// ============================================================================

/// Bullets on their own line, single spaces, at most one blank line in a row.
pub fn normalize_text(raw: &str) -> String {
    let text = raw.replace("\r\n", "\n").replace('\r', "\n");
    let text = BULLET_INLINE.replace_all(&text, "$1\n$2");
    let text = SPACE_RUNS.replace_all(&text, " ");
    let text = SPACE_AROUND_NEWLINE.replace_all(&text, "\n");
    let text = NEWLINE_RUNS.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Contact fields plus the raw strings they were matched from.
#[derive(Debug, Clone, Default)]
pub struct ContactMatches {
    pub info: ContactInfo,
    pub raw: Vec<String>,
}

pub fn extract_contacts(text: &str) -> ContactMatches {
    let mut matches = ContactMatches::default();
    let mut remainder = text.to_string();

    if let Some(m) = EMAIL.find(text) {
        matches.info.email = Some(m.as_str().to_string());
        matches.raw.push(m.as_str().to_string());
    }
    if let Some(caps) = LINKEDIN.captures(text) {
        matches.info.linkedin_url = Some(format!("https://www.linkedin.com/in/{}", &caps[1]));
        matches.raw.push(caps[0].to_string());
    }
    if let Some(caps) = GITHUB.captures(text) {
        matches.info.github_url = Some(format!("https://github.com/{}", &caps[1]));
        matches.raw.push(caps[0].to_string());
    }
    for caps in PORTFOLIO.captures_iter(text) {
        let link = caps[1].to_lowercase();
        if link.contains("linkedin.com") || link.contains("github.com") {
            continue;
        }
        matches.info.portfolio_url = Some(if caps[1].starts_with("http") {
            caps[1].to_string()
        } else {
            format!("https://{}", &caps[1])
        });
        matches.raw.push(caps[0].to_string());
        break;
    }

    // Phone numbers are searched only outside the links matched above.
    for raw in &matches.raw {
        remainder = remainder.replace(raw.as_str(), " ");
    }
    remainder = EMAIL.replace_all(&remainder, " ").into_owned();
    let phone = PHONE.find_iter(&remainder).find(|m| {
        let before = remainder[..m.start()].chars().next_back();
        let after = remainder[m.end()..].chars().next();
        let glued = matches!(before, Some(c) if c.is_alphanumeric() || c == '-' || c == '/' || c == '_');
        // "(2014-2018)" in education lines
        let parenthesized = before == Some('(') && after == Some(')');
        !glued && !parenthesized && !YEAR_RANGE.is_match(m.as_str().trim())
    });
    if let Some(m) = phone {
        matches.info.phone = Some(m.as_str().trim().to_string());
        matches.raw.push(m.as_str().to_string());
    }

    matches
}

// ============================================================================
// Header Classification
// ============================================================================

fn looks_like_name(line: &str) -> bool {
    if line.len() > 60 || line.chars().any(|c| c.is_ascii_digit() || "@/|:,()".contains(c)) {
        return false;
    }
    if is_anchor_line(line) {
        return false;
    }
    let words: Vec<&str> = line.split_whitespace().collect();
    if !(2..=4).contains(&words.len()) {
        return false;
    }
    words.iter().all(|word| {
        NAME_CONNECTORS.contains(word)
            || word.chars().next().map(char::is_uppercase).unwrap_or(false)
    })
}

fn looks_like_location(line: &str) -> bool {
    if line.contains('|') || line.contains('@') {
        return false;
    }
    if PLACE_SHAPE.is_match(line) || COUNTRIES.contains(&line) {
        return true;
    }
    let lower = line.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| REGION_MARKERS.contains(&word))
}

struct Header {
    name: Option<String>,
    headline: Option<String>,
    location: Option<String>,
}

fn parse_header(header: &str, contacts: &ContactMatches) -> Header {
    let mut cleaned = header.to_string();
    for raw in &contacts.raw {
        cleaned = cleaned.replace(raw.as_str(), "");
    }
    let cleaned = CONTACT_LABEL.replace_all(&cleaned, "");

    let lines: Vec<&str> = cleaned
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !is_anchor_line(l) && !PAGE_FOOTER.is_match(l))
        .collect();

    let name_idx = lines.iter().position(|l| looks_like_name(l));
    let search_from = name_idx.map(|i| i + 1).unwrap_or(0);
    let location_idx = lines[search_from..]
        .iter()
        .position(|l| looks_like_location(l))
        .map(|i| i + search_from);

    let headline = match (name_idx, location_idx) {
        (Some(n), Some(loc)) if loc > n + 1 => Some(lines[n + 1..loc].join(" ")),
        (Some(n), None) => lines.get(n + 1).map(|l| l.to_string()),
        _ => None,
    };

    if name_idx.is_none() {
        debug!("[Parser] no name-shaped line in header ({} lines)", lines.len());
    }

    Header {
        name: name_idx.map(|i| lines[i].to_string()),
        headline,
        location: location_idx.map(|i| lines[i].to_string()),
    }
}

// ============================================================================
// Section Parsers
// ============================================================================

fn content_lines(section: &str) -> Vec<&str> {
    section
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !is_anchor_line(l) && !PAGE_FOOTER.is_match(l))
        .collect()
}

pub fn parse_experience(section: &str) -> Vec<ExperienceEntry> {
    let lines = content_lines(section);
    let date_lines: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| EXPERIENCE_DATE_LINE.is_match(l))
        .map(|(i, _)| i)
        .collect();

    let mut entries = Vec::with_capacity(date_lines.len());
    let mut previous_date: Option<usize> = None;
    for (k, &d) in date_lines.iter().enumerate() {
        let floor = previous_date.map(|p| p + 1).unwrap_or(0);
        let title = (d >= 1 && d - 1 >= floor).then(|| lines[d - 1]).unwrap_or_default();

        let mut company_idx = (d >= 2 && d - 2 >= floor).then(|| d - 2);
        if let Some(idx) = company_idx {
            if TENURE_LINE.is_match(lines[idx]) {
                company_idx = (idx >= 1 && idx - 1 >= floor).then(|| idx - 1);
            }
        }
        let company = company_idx.map(|i| lines[i]).unwrap_or_default();

        let desc_start = d + 1;
        let desc_end = match date_lines.get(k + 1) {
            Some(&next) => next.saturating_sub(2).max(desc_start),
            None => lines.len(),
        };
        let description = lines[desc_start..desc_end].join("\n");

        entries.push(ExperienceEntry {
            title: title.to_string(),
            company_name: company.to_string(),
            date_range: lines[d].to_string(),
            description,
        });
        previous_date = Some(d);
    }

    if entries.is_empty() && !lines.is_empty() {
        debug!("[Parser] experience section has no date-range lines");
    }
    entries
}

pub fn parse_education(section: &str) -> Vec<EducationEntry> {
    let lines = content_lines(section);
    let mut entries = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = EDUCATION_DATE.captures(line) else {
            continue;
        };
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let degree = line
            .replace(whole, "")
            .trim()
            .trim_end_matches(|c: char| c == '·' || c == ',' || c.is_whitespace())
            .to_string();
        let school = if i >= 1 { lines[i - 1] } else { "" };
        entries.push(EducationEntry {
            school_name: school.to_string(),
            degree,
            date_range: caps[1].trim().to_string(),
        });
    }
    entries
}

pub fn parse_list(section: &str) -> Vec<NamedItem> {
    content_lines(section)
        .into_iter()
        .map(|l| LEADING_BULLET.replace(l, "").trim().to_string())
        .filter(|l| !l.is_empty())
        .map(NamedItem::new)
        .collect()
}

// ============================================================================
// Entry Point
// ============================================================================

pub fn parse_linkedin_pdf_text(raw: &str) -> StructuredProfile {
    let text = normalize_text(raw);
    let sections = Sections::segment(&text);
    let contacts = extract_contacts(&text);
    let header = parse_header(&sections.header(), &contacts);

    let about = sections
        .get(SectionKind::Summary)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    StructuredProfile {
        name: header.name,
        headline: header.headline,
        location: header.location,
        contact: contacts.info,
        about,
        experience: sections
            .get(SectionKind::Experience)
            .map(parse_experience)
            .unwrap_or_default(),
        education: sections
            .get(SectionKind::Education)
            .map(parse_education)
            .unwrap_or_default(),
        skills: sections
            .get(SectionKind::TopSkills)
            .map(parse_list)
            .unwrap_or_default(),
        certifications: sections
            .get(SectionKind::Certifications)
            .map(parse_list)
            .unwrap_or_default(),
    }
}
