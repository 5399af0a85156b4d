//! Prompts for the three Generative Analyzer call shapes.
//!
//! The key names inside the JSON templates are the wire contract that
//! `DocumentRecord` and `PageResult` deserialize from.

/// Field schema shared by document and page prompts.
const FIELD_SCHEMA: &str = r#"{
  "ihale_basligi": "İhalenin adı/konusu",
  "kurum": "İhaleyi yapan idare",
  "tarih": "İhale tarihi (GG.AA.YYYY)",
  "bedel": "Yaklaşık maliyet / tahmini bedel (para birimi ile)",
  "sure": "Sözleşme / iş süresi",
  "ikn": "İhale kayıt numarası (YYYY/NNNNNN)",
  "ise_baslama_tarihi": "İşe başlama tarihi",
  "is_bitis_tarihi": "İşin bitiş tarihi",
  "gunluk_ogun_sayisi": "Günlük toplam öğün sayısı",
  "kisi_sayisi": "Yemek verilecek toplam kişi sayısı",
  "sinir_deger_katsayisi": "Sınır değer katsayısı (R)",
  "benzer_is_tanimi": "Benzer iş tanımı",
  "teknik_sartlar": ["Önemli teknik şart"],
  "birim_fiyatlar": [{"kalem": "", "miktar": "", "birim": "", "fiyat": ""}],
  "iletisim": {"adres": "", "telefon": "", "email": "", "yetkili": ""},
  "notlar": ["Önemli not"],
  "personel_detaylari": [{"pozisyon": "", "adet": ""}],
  "ogun_bilgileri": [{"ogun": "", "kisi_sayisi": "", "gramaj": ""}],
  "is_yerleri": ["Hizmet verilecek yer"],
  "mali_kriterler": {"is_deneyimi": "", "ozkaynak_orani": "", "cari_oran": ""},
  "ceza_kosullari": [{"durum": "", "ceza": ""}],
  "fiyat_farki": {"uygulanacak_mi": "", "formul": ""},
  "gerekli_belgeler": ["Belge adı"],
  "teminat_oranlari": {"gecici": "", "kesin": ""},
  "servis_saatleri": {"kahvalti": "", "ogle": "", "aksam": ""}
}"#;

const RULES: &str = "KURALLAR:
- Sadece belgede açıkça yazan bilgileri yaz, tahmin yapma.
- Bulunamayan metin alanları için \"\" kullan, bulunamayan listeler için [].
- Tarihleri GG.AA.YYYY biçiminde yaz.
- Yanıt olarak SADECE geçerli bir JSON nesnesi döndür.";

/// Prompt for whole-document and text-layer analysis.
///
/// An empty `text` means the document is attached to the call.
pub fn build_document_prompt(text: &str) -> String {
    let source = if text.trim().is_empty() {
        "Ekteki ihale dokümanını analiz et.".to_string()
    } else {
        format!("Aşağıdaki ihale dokümanı metnini analiz et.\n\n--- DOKÜMAN ---\n{text}\n--- DOKÜMAN SONU ---")
    };
    format!(
        "Sen kamu ihalelerinde uzman bir analistsin. {source}\n\n\
         Aşağıdaki JSON yapısını doldur. Ek olarak belgenin tüm metnini \"tam_metin\" alanına yaz.\n\n\
         {FIELD_SCHEMA}\n\n{RULES}"
    )
}

/// Prompt for a single rendered page image.
pub fn build_page_prompt() -> String {
    format!(
        "Bu görsel bir ihale dokümanının tek bir sayfasıdır. Sayfadaki TÜM METNİ oku \
         ve \"sayfa_metni\" alanına aynen yaz; tablolar varsa satır satır yaz. \
         Ardından sayfada tespit ettiğin bilgileri \"tespit_edilen_bilgiler\" altında ver.\n\n\
         {{\"sayfa_metni\": \"\", \"tespit_edilen_bilgiler\": {FIELD_SCHEMA}}}\n\n{RULES}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_prompt_embeds_text() {
        let p = build_document_prompt("İKN: 2024/123456");
        assert!(p.contains("2024/123456"));
        assert!(p.contains("\"teminat_oranlari\""));
        assert!(p.contains("tam_metin"));
    }

    #[test]
    fn attachment_prompt_has_no_text_block() {
        let p = build_document_prompt("");
        assert!(p.contains("Ekteki"));
        assert!(!p.contains("--- DOKÜMAN ---"));
    }

    #[test]
    fn page_prompt_wraps_schema() {
        let p = build_page_prompt();
        assert!(p.contains("\"sayfa_metni\""));
        assert!(p.contains("tespit_edilen_bilgiler"));
        assert!(p.contains("servis_saatleri"));
    }
}
